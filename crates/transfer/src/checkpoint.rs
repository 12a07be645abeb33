use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use outpost_protocol::types::ResolvedLocation;
use outpost_store::PersistentStore;

use crate::TransferError;

/// Current persisted checkpoint format.
const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Durable record of transfer progress, keyed by resource identity plus
/// destination path and rewritten after every chunk.
///
/// Invariant: `offset <= total_length`. The stored location may already be
/// expired by the time it is reloaded; sessions check expiry before use
/// and re-resolve instead of retrying a dead location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferCheckpoint {
    pub version: u32,
    pub file_id: String,
    pub file_name: String,
    pub local_path: PathBuf,
    pub total_length: u64,
    pub mime_type: String,
    /// Bytes already transferred and confirmed contiguous.
    pub offset: u64,
    pub location: Option<ResolvedLocation>,
}

impl TransferCheckpoint {
    pub fn new(
        file_id: impl Into<String>,
        file_name: impl Into<String>,
        local_path: impl Into<PathBuf>,
        total_length: u64,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            version: CHECKPOINT_FORMAT_VERSION,
            file_id: file_id.into(),
            file_name: file_name.into(),
            local_path: local_path.into(),
            total_length,
            mime_type: mime_type.into(),
            offset: 0,
            location: None,
        }
    }

    /// Store key for a given resource identity and destination.
    ///
    /// The path is digested so arbitrary filesystem paths stay inside one
    /// flat key namespace.
    pub fn storage_key(file_id: &str, local_path: &Path) -> String {
        let digest = Sha256::digest(local_path.to_string_lossy().as_bytes());
        format!("transfer:{file_id}:{}", hex::encode(&digest[..8]))
    }

    /// Loads the checkpoint for (`file_id`, `local_path`), if any.
    pub fn load(
        store: &dyn PersistentStore,
        file_id: &str,
        local_path: &Path,
    ) -> Result<Option<Self>, TransferError> {
        let Some(bytes) = store.load(&Self::storage_key(file_id, local_path))? else {
            return Ok(None);
        };
        let checkpoint: Self = serde_json::from_slice(&bytes)?;
        if checkpoint.version != CHECKPOINT_FORMAT_VERSION {
            return Err(TransferError::UnsupportedVersion(checkpoint.version));
        }
        Ok(Some(checkpoint))
    }

    /// Persists the checkpoint.
    pub fn save(&self, store: &dyn PersistentStore) -> Result<(), TransferError> {
        let key = Self::storage_key(&self.file_id, &self.local_path);
        let bytes = serde_json::to_vec(self)?;
        store.save(&key, &bytes)?;
        Ok(())
    }

    /// Removes the checkpoint. No-op if absent.
    pub fn clear(
        store: &dyn PersistentStore,
        file_id: &str,
        local_path: &Path,
    ) -> Result<(), TransferError> {
        store.delete(&Self::storage_key(file_id, local_path))?;
        Ok(())
    }
}
