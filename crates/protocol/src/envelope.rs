use serde::{Deserialize, Serialize};

use crate::types::ApiError;

/// Control-plane operation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlOp {
    /// Replay one queued record mutation.
    SaveRecord,
    /// Allocate an upload location for a file.
    ResolveUpload,
    /// Resolve a download location for a file.
    ResolveDownload,
    /// List file metadata matching a filter.
    QueryFiles,
    /// Remove a file from the remote store.
    DeleteFile,
}

/// Envelope for a control-plane request.
///
/// The `payload` field uses `serde_json::value::RawValue` to defer
/// deserialization until the op has been routed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequest {
    pub id: String,
    pub op: ControlOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<serde_json::value::RawValue>>,
}

impl ControlRequest {
    /// Creates a request with a generated id and the given payload.
    pub fn new<T: Serialize>(op: ControlOp, payload: Option<&T>) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            op,
            payload: to_raw(payload)?,
        })
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        from_raw(&self.payload)
    }
}

/// Envelope for a control-plane response.
///
/// Exactly one of `payload` and `error` is expected to be set; a response
/// carrying neither is an empty success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<serde_json::value::RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl ControlResponse {
    /// Creates a success response for the request with `id`.
    pub fn ok<T: Serialize>(
        id: impl Into<String>,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: id.into(),
            payload: to_raw(payload)?,
            error: None,
        })
    }

    /// Creates an error response for the request with `id`.
    pub fn fail(id: impl Into<String>, error: ApiError) -> Self {
        Self {
            id: id.into(),
            payload: None,
            error: Some(error),
        }
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        from_raw(&self.payload)
    }

    /// Converts the response into a typed result: server-reported errors
    /// become `Err`, a missing payload becomes `Ok(None)`.
    pub fn into_result<T: for<'de> Deserialize<'de>>(self) -> Result<Option<T>, ApiError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.parse_payload()
            .map_err(|e| ApiError::permanent(-1, format!("malformed response payload: {e}")))
    }
}

fn to_raw<T: Serialize>(
    payload: Option<&T>,
) -> Result<Option<Box<serde_json::value::RawValue>>, serde_json::Error> {
    match payload {
        Some(p) => {
            let json = serde_json::to_string(p)?;
            Ok(Some(serde_json::value::RawValue::from_string(json)?))
        }
        None => Ok(None),
    }
}

fn from_raw<T: for<'de> Deserialize<'de>>(
    raw: &Option<Box<serde_json::value::RawValue>>,
) -> Result<Option<T>, serde_json::Error> {
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{DeleteFileRequest, DeleteFileResponse};

    #[test]
    fn request_generates_unique_ids() {
        let a = ControlRequest::new::<()>(ControlOp::QueryFiles, None).unwrap();
        let b = ControlRequest::new::<()>(ControlOp::QueryFiles, None).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn request_payload_roundtrip() {
        let req = ControlRequest::new(
            ControlOp::DeleteFile,
            Some(&DeleteFileRequest {
                file_id: "f1".into(),
            }),
        )
        .unwrap();
        let parsed: DeleteFileRequest = req.parse_payload().unwrap().unwrap();
        assert_eq!(parsed.file_id, "f1");
    }

    #[test]
    fn request_without_payload_omits_field() {
        let req = ControlRequest::new::<()>(ControlOp::QueryFiles, None).unwrap();
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("payload"));
    }

    #[test]
    fn op_wire_names_are_snake_case() {
        let json = serde_json::to_string(&ControlOp::ResolveDownload).unwrap();
        assert_eq!(json, "\"resolve_download\"");
    }

    #[test]
    fn response_ok_into_result() {
        let resp = ControlResponse::ok("r1", Some(&DeleteFileResponse { count: 1 })).unwrap();
        let parsed: Option<DeleteFileResponse> = resp.into_result().unwrap();
        assert_eq!(parsed.unwrap().count, 1);
    }

    #[test]
    fn response_error_into_result() {
        let resp = ControlResponse::fail("r1", ApiError::permanent(404, "no such file"));
        let result: Result<Option<DeleteFileResponse>, ApiError> = resp.into_result();
        let err = result.unwrap_err();
        assert_eq!(err.code, 404);
        assert!(!err.retryable);
    }

    #[test]
    fn response_json_roundtrip() {
        let resp = ControlResponse::fail("e1", ApiError::transient(503, "busy"));
        let json = serde_json::to_string(&resp).unwrap();
        let back: ControlResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "e1");
        assert!(back.payload.is_none());
        assert!(back.error.unwrap().retryable);
    }
}
