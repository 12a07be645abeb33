use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{PersistentStore, StoreError};

/// File-per-key store rooted at a directory.
///
/// Each key maps to one file. `save` writes a sibling `.tmp` file, syncs
/// it, then renames it over the final path, so a crash at any point leaves
/// either the old or the new record on disk.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("empty key".into()));
        }
        Ok(self.root.join(file_name_for(key)))
    }
}

/// Maps an arbitrary key to a safe, collision-free file name.
///
/// The readable prefix keeps the directory inspectable; the digest suffix
/// distinguishes keys that sanitize to the same prefix ("a:b" vs "a_b").
fn file_name_for(key: &str) -> String {
    let mut prefix: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    prefix.truncate(80);

    let digest = Sha256::digest(key.as_bytes());
    format!("{prefix}-{}.rec", hex::encode(&digest[..8]))
}

impl PersistentStore for DirStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("tmp");

        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;

        debug!(key, bytes = bytes.len(), "persisted record");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
