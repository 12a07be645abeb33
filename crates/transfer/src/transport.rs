//! The data-plane seam.
//!
//! Once the control plane has resolved a location, bytes move through this
//! trait. Using chunk-granular calls (rather than a streaming body) makes
//! every chunk a suspension point, keeps retries range-addressable, and
//! lets tests script the remote end.

use std::future::Future;
use std::pin::Pin;

use outpost_protocol::types::{ApiError, ResolvedLocation};

/// Abstract data-plane transport against a resolved location.
///
/// Errors must carry the retryable-vs-permanent classification. An expired
/// location is never handled here; sessions check expiry and re-resolve
/// through the control plane.
pub trait DataPlane: Send + Sync {
    /// Reads up to `len` bytes starting at `offset`.
    ///
    /// A short (or empty) result means the remote end has no more bytes at
    /// that offset.
    fn fetch_range(
        &self,
        location: &ResolvedLocation,
        offset: u64,
        len: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, ApiError>> + Send + '_>>;

    /// Writes `data` at `offset` of a resource whose declared total length
    /// is `total`.
    fn send_range(
        &self,
        location: &ResolvedLocation,
        offset: u64,
        data: &[u8],
        total: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>>;
}
