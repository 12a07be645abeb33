use std::collections::HashMap;
use std::sync::RwLock;

use crate::{PersistentStore, StoreError};

/// In-memory store for tests and ephemeral configurations.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PersistentStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.records.read().unwrap().get(key).cloned())
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("empty key".into()));
        }
        self.records
            .write()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.records.write().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_delete() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.save("a", b"1").unwrap();
        store.save("b", b"2").unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.load("a").unwrap().unwrap(), b"1");

        store.delete("a").unwrap();
        assert!(store.load("a").unwrap().is_none());
        store.delete("a").unwrap(); // absent: no-op
    }
}
