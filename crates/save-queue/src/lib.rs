//! Durable offline write queue.
//!
//! Mutations are buffered per (collection, record) in a [`SaveQueue`] that
//! coalesces repeated writes to the same record, persists itself through a
//! [`PersistentStore`](outpost_store::PersistentStore) on every structural
//! change, and survives process restart. A [`QueueDrainer`] replays queued
//! items through the control plane in insertion order, retrying transient
//! failures with capped exponential backoff and reporting every outcome
//! through the queue's delegate.

mod delegate;
mod drainer;
mod queue;

pub use delegate::{SaveDelegate, SaveOutcome};
pub use drainer::{DrainerHandle, QueueDrainer};
pub use queue::{QueueItem, SaveQueue};

/// Errors produced by the save-queue crate.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("store error: {0}")]
    Store(#[from] outpost_store::StoreError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unsupported queue format version {0}")]
    UnsupportedVersion(u32),
}
