//! The control-plane seam.
//!
//! Both active components (the queue drainer and transfer sessions) speak
//! to the backend through this trait, which keeps them decoupled from the
//! concrete HTTP client and testable with scripted mocks.

use std::future::Future;
use std::pin::Pin;

use crate::envelope::{ControlRequest, ControlResponse};
use crate::types::ApiError;

/// Abstract control-plane transport.
///
/// `Err` is reserved for transport-level failures (the request never
/// produced a response); server-side rejections travel inside the
/// returned [`ControlResponse`]'s `error` field. Both carry the
/// retryable-vs-permanent classification.
pub trait ControlPlane: Send + Sync {
    /// Sends a request and waits for the matching response.
    fn call(
        &self,
        request: ControlRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ControlResponse, ApiError>> + Send + '_>>;
}
