//! Durable key-value storage.
//!
//! Queue contents and transfer checkpoints are persisted through
//! [`PersistentStore`] so they survive process restart. Writes are whole
//! records: a crash mid-write must leave either the old or the new value
//! intact, never a corrupt mix.

mod dir;
mod memory;

pub use dir::DirStore;
pub use memory::MemoryStore;

/// Errors produced by the store crate.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid store key: {0}")]
    InvalidKey(String),
}

/// Durable key-value storage consumed by the queue and transfer engine.
///
/// Implementations must make `save` atomic at record granularity and must
/// tolerate `delete` of absent keys.
pub trait PersistentStore: Send + Sync {
    /// Loads the value for `key`, or `None` if absent.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stores `bytes` under `key`, replacing any previous value atomically.
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Removes `key`. No-op if absent.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}
