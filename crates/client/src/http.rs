use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

use outpost_protocol::envelope::{ControlRequest, ControlResponse};
use outpost_protocol::transport::ControlPlane;
use outpost_protocol::types::{ApiError, ResolvedLocation};
use outpost_transfer::DataPlane;

use crate::{ClientConfig, ClientError};

/// Request timeout for both planes.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP implementation of both transport seams.
///
/// Control ops are POSTed as envelopes to `<base_url>/rpc`; the data plane
/// issues ranged `GET`s and `Content-Range` `PUT`s directly against
/// resolved URLs, forwarding any headers the location requires.
pub struct HttpTransport {
    http: reqwest::Client,
    rpc_url: String,
    app_key: String,
    auth_token: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        if config.base_url.is_empty() {
            return Err(ClientError::InvalidConfig("base_url is empty".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClientError::InvalidConfig(format!("http client: {e}")))?;

        Ok(Self {
            http,
            rpc_url: format!("{}/rpc", config.base_url.trim_end_matches('/')),
            app_key: config.app_key.clone(),
            auth_token: config.auth_token.clone(),
        })
    }

    fn apply_location_headers(
        mut builder: reqwest::RequestBuilder,
        location: &ResolvedLocation,
    ) -> reqwest::RequestBuilder {
        for (name, value) in &location.headers {
            builder = builder.header(name, value);
        }
        builder
    }
}

/// Maps an HTTP status to the retryable-vs-permanent taxonomy: server-side
/// trouble and throttling are worth retrying, everything else in the error
/// range is a rejection.
fn classify_status(status: u16, context: &str) -> ApiError {
    let message = format!("{context} failed with status {status}");
    match status {
        408 | 429 => ApiError::transient(status as i32, message),
        s if s >= 500 => ApiError::transient(status as i32, message),
        s => ApiError::permanent(s as i32, message),
    }
}

/// Network-level failures (DNS, connect, timeout) never reached the
/// server; they are always worth retrying.
fn transport_error(context: &str, e: &reqwest::Error) -> ApiError {
    ApiError::transient(0, format!("{context}: {e}"))
}

fn range_header(offset: u64, len: usize) -> String {
    format!("bytes={offset}-{}", offset + len as u64 - 1)
}

fn content_range_header(offset: u64, len: usize, total: u64) -> String {
    format!("bytes {offset}-{}/{total}", offset + len as u64 - 1)
}

impl ControlPlane for HttpTransport {
    fn call(
        &self,
        request: ControlRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ControlResponse, ApiError>> + Send + '_>> {
        Box::pin(async move {
            debug!(op = ?request.op, id = %request.id, "control call");
            let response = self
                .http
                .post(&self.rpc_url)
                .bearer_auth(&self.auth_token)
                .header("x-app-key", &self.app_key)
                .json(&request)
                .send()
                .await
                .map_err(|e| transport_error("control call", &e))?;

            let status = response.status().as_u16();
            if !(200..300).contains(&status) {
                return Err(classify_status(status, "control call"));
            }

            response
                .json::<ControlResponse>()
                .await
                .map_err(|e| ApiError::permanent(-1, format!("malformed control response: {e}")))
        })
    }
}

impl DataPlane for HttpTransport {
    fn fetch_range(
        &self,
        location: &ResolvedLocation,
        offset: u64,
        len: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, ApiError>> + Send + '_>> {
        let url = location.url.clone();
        let location = location.clone();
        Box::pin(async move {
            let builder = self
                .http
                .get(&url)
                .header(reqwest::header::RANGE, range_header(offset, len));
            let response = Self::apply_location_headers(builder, &location)
                .send()
                .await
                .map_err(|e| transport_error("fetch", &e))?;

            let status = response.status().as_u16();
            // Requested range starts past the end: nothing left to read.
            if status == 416 {
                return Ok(Vec::new());
            }
            if !(200..300).contains(&status) {
                return Err(classify_status(status, "fetch"));
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| transport_error("fetch body", &e))?;
            Ok(bytes.to_vec())
        })
    }

    fn send_range(
        &self,
        location: &ResolvedLocation,
        offset: u64,
        data: &[u8],
        total: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>> {
        let url = location.url.clone();
        let location = location.clone();
        let body = data.to_vec();
        Box::pin(async move {
            let builder = self
                .http
                .put(&url)
                .header(
                    reqwest::header::CONTENT_RANGE,
                    content_range_header(offset, body.len(), total),
                )
                .body(body);
            let response = Self::apply_location_headers(builder, &location)
                .send()
                .await
                .map_err(|e| transport_error("send", &e))?;

            let status = response.status().as_u16();
            // 308: the store acknowledges the range and awaits the rest.
            if (200..300).contains(&status) || status == 308 {
                return Ok(());
            }
            Err(classify_status(status, "send"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(classify_status(500, "x").retryable);
        assert!(classify_status(503, "x").retryable);
        assert!(classify_status(429, "x").retryable);
        assert!(classify_status(408, "x").retryable);
        assert!(!classify_status(400, "x").retryable);
        assert!(!classify_status(403, "x").retryable);
        assert!(!classify_status(404, "x").retryable);
        assert_eq!(classify_status(404, "x").code, 404);
    }

    #[test]
    fn range_headers() {
        assert_eq!(range_header(0, 1024), "bytes=0-1023");
        assert_eq!(range_header(1000, 4000), "bytes=1000-4999");
        assert_eq!(content_range_header(1000, 4000, 5000), "bytes 1000-4999/5000");
    }

    #[test]
    fn rpc_url_normalizes_trailing_slash() {
        let config = ClientConfig::new("https://api.example.com/v1/", "k", "t", "/data");
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.rpc_url, "https://api.example.com/v1/rpc");
    }

    #[test]
    fn empty_base_url_rejected() {
        let config = ClientConfig::new("", "k", "t", "/data");
        assert!(matches!(
            HttpTransport::new(&config),
            Err(ClientError::InvalidConfig(_))
        ));
    }
}
