//! Offline-resilient sync client.
//!
//! [`OutpostClient`] is the application-facing surface: record mutations
//! queue durably while disconnected and replay once connectivity returns;
//! files upload and download resumably against a two-phase
//! (resolve-location, then stream) protocol. The heavy lifting lives in
//! the `outpost-save-queue` and `outpost-transfer` crates; this crate
//! wires them to a concrete HTTP transport and a directory store.

mod client;
mod config;
mod http;
mod mime;

pub use client::{FileRef, OutpostClient};
pub use config::{ClientConfig, DownloadOptions, FileSelector, UploadOptions};
pub use http::HttpTransport;
pub use mime::mime_for_path;

// Re-exported so applications only need this crate.
pub use outpost_protocol::messages::FileQuery;
pub use outpost_protocol::types::{ApiError, FileMetadata, ResolvedLocation};
pub use outpost_save_queue::{QueueItem, SaveDelegate, SaveOutcome};
pub use outpost_transfer::{BatchResult, FileHandle, SessionEnd, TransferEvent};

/// Errors surfaced by the client facade.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Api(#[from] outpost_protocol::types::ApiError),

    #[error("store error: {0}")]
    Store(#[from] outpost_store::StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] outpost_save_queue::QueueError),

    #[error("transfer error: {0}")]
    Transfer(#[from] outpost_transfer::TransferError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{got} destination names provided for {expected} requested files")]
    DestinationArity { expected: usize, got: usize },

    #[error("transfer interrupted at byte {offset}; resume to continue")]
    Interrupted { offset: u64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
