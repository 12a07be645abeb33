//! Resumable file transfer engine.
//!
//! A transfer runs as a [`TransferSession`]: a state machine that resolves
//! a short-lived remote location through the control plane, streams bytes
//! against it on the data plane, checkpoints progress durably after every
//! chunk, and re-resolves the location when it expires. The
//! [`TransferCoordinator`] routes requests to sessions, enforces
//! at-most-one-active-session per resource, and aggregates batch outcomes.

mod checkpoint;
mod chunk;
mod coordinator;
mod session;
mod transport;

pub use checkpoint::TransferCheckpoint;
pub use chunk::{Chunk, ChunkSource, PartSink, digest_bytes, digest_file, part_path_for};
pub use coordinator::{BatchResult, TransferCoordinator};
pub use session::{
    Direction, FileHandle, SessionEnd, SessionState, SinkMode, TransferDescriptor, TransferEvent,
    TransferSession,
};
pub use transport::DataPlane;

/// Default chunk size: 1 MiB.
///
/// Each chunk is one data-plane round trip and one checkpoint write, so
/// the chunk size bounds both retransmission after an interruption and
/// checkpoint granularity.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Errors produced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer already in progress for {0}")]
    AlreadyInProgress(String),

    #[error("no resumable session for {0}")]
    SessionNotFound(String),

    #[error("length mismatch: declared {declared}, observed {observed}")]
    LengthMismatch { declared: u64, observed: u64 },

    #[error("checksum mismatch for {0}")]
    ChecksumMismatch(String),

    #[error(transparent)]
    Api(#[from] outpost_protocol::types::ApiError),

    #[error("store error: {0}")]
    Store(#[from] outpost_store::StoreError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unsupported checkpoint format version {0}")]
    UnsupportedVersion(u32),

    #[error("session is not in a runnable state: {0:?}")]
    NotRunnable(session::SessionState),
}
