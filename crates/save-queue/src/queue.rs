use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::debug;

use outpost_store::PersistentStore;

use crate::{QueueError, SaveDelegate, SaveOutcome};

/// Current persisted queue format.
const QUEUE_FORMAT_VERSION: u32 = 1;

/// One pending mutation for a single record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub record_id: String,
    /// Snapshot of the record body at the most recent local write.
    pub body: serde_json::Value,
    /// Time of the most recent local write.
    pub saved_at: DateTime<Utc>,
}

/// On-disk form of a queue.
#[derive(Serialize, Deserialize)]
struct PersistedQueue {
    version: u32,
    collection: String,
    items: Vec<QueueItem>,
}

/// Ordered, coalescing buffer of pending record mutations.
///
/// Insertion order defines replay order. A second enqueue for the same
/// record replaces the snapshot and timestamp in place, keeping the
/// record's original position. Every mutation is written through to the
/// backing store before returning, so a crash between enqueue and drain
/// loses nothing.
pub struct SaveQueue {
    collection: String,
    storage_key: String,
    store: Arc<dyn PersistentStore>,
    items: Mutex<Vec<QueueItem>>,
    work: Notify,
    delegate: Mutex<Option<Weak<dyn SaveDelegate>>>,
}

impl SaveQueue {
    /// Opens the queue for `collection` under a device-local `namespace`,
    /// reconstructing any previously persisted contents.
    pub fn open(
        collection: impl Into<String>,
        namespace: &str,
        store: Arc<dyn PersistentStore>,
    ) -> Result<Arc<Self>, QueueError> {
        let collection = collection.into();
        let storage_key = format!("savequeue:{collection}:{namespace}");

        let items = match store.load(&storage_key)? {
            Some(bytes) => {
                let persisted: PersistedQueue = serde_json::from_slice(&bytes)?;
                if persisted.version != QUEUE_FORMAT_VERSION {
                    return Err(QueueError::UnsupportedVersion(persisted.version));
                }
                persisted.items
            }
            None => Vec::new(),
        };

        debug!(collection = %collection, restored = items.len(), "opened save queue");

        Ok(Arc::new(Self {
            collection,
            storage_key,
            store,
            items: Mutex::new(items),
            work: Notify::new(),
            delegate: Mutex::new(None),
        }))
    }

    /// The collection this queue is bound to.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Inserts a mutation, or coalesces it into the existing item for the
    /// same record (new snapshot and timestamp, original position).
    pub fn enqueue(
        &self,
        record_id: impl Into<String>,
        body: serde_json::Value,
    ) -> Result<(), QueueError> {
        let record_id = record_id.into();
        {
            let mut items = self.items.lock().unwrap();
            match items.iter_mut().find(|i| i.record_id == record_id) {
                Some(existing) => {
                    existing.body = body;
                    existing.saved_at = Utc::now();
                }
                None => items.push(QueueItem {
                    record_id,
                    body,
                    saved_at: Utc::now(),
                }),
            }
            self.persist(&items)?;
        }
        self.work.notify_one();
        Ok(())
    }

    /// Removes the item for `record_id`. Returns `false` if absent.
    pub fn remove(&self, record_id: &str) -> Result<bool, QueueError> {
        let mut items = self.items.lock().unwrap();
        let before = items.len();
        items.retain(|i| i.record_id != record_id);
        if items.len() == before {
            return Ok(false);
        }
        self.persist(&items)?;
        Ok(true)
    }

    /// Removes the item for `record_id` only if its timestamp still equals
    /// `saved_at`, i.e. no newer write has coalesced in since the caller
    /// snapshotted the item. Returns `true` if removed.
    pub fn remove_if_unchanged(
        &self,
        record_id: &str,
        saved_at: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let mut items = self.items.lock().unwrap();
        let before = items.len();
        items.retain(|i| i.record_id != record_id || i.saved_at != saved_at);
        if items.len() == before {
            return Ok(false);
        }
        self.persist(&items)?;
        Ok(true)
    }

    /// Record ids currently queued, in replay order.
    pub fn ids(&self) -> Vec<String> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .map(|i| i.record_id.clone())
            .collect()
    }

    /// Point-in-time copy of the queued items, in replay order.
    pub fn items(&self) -> Vec<QueueItem> {
        self.items.lock().unwrap().clone()
    }

    /// Number of queued items.
    pub fn count(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    /// Registers the outcome observer. The queue keeps only a weak
    /// reference; dropping the delegate elsewhere unregisters it.
    pub fn set_delegate(&self, delegate: &Arc<dyn SaveDelegate>) {
        *self.delegate.lock().unwrap() = Some(Arc::downgrade(delegate));
    }

    /// Resolves until the next mutation signals that work may be available.
    pub async fn work_available(&self) {
        self.work.notified().await;
    }

    pub(crate) fn notify_delegate(&self, record_id: &str, outcome: SaveOutcome) {
        let delegate = self.delegate.lock().unwrap().clone();
        if let Some(weak) = delegate
            && let Some(delegate) = weak.upgrade()
        {
            delegate.on_outcome(&self.collection, record_id, outcome);
        }
    }

    fn persist(&self, items: &[QueueItem]) -> Result<(), QueueError> {
        let persisted = PersistedQueue {
            version: QUEUE_FORMAT_VERSION,
            collection: self.collection.clone(),
            items: items.to_vec(),
        };
        let bytes = serde_json::to_vec(&persisted)?;
        self.store.save(&self.storage_key, &bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_store::MemoryStore;
    use serde_json::json;

    fn open_queue(store: &Arc<MemoryStore>) -> Arc<SaveQueue> {
        let store: Arc<dyn PersistentStore> = Arc::clone(store) as _;
        SaveQueue::open("books", "dev-1", store).unwrap()
    }

    #[test]
    fn count_equals_distinct_keys() {
        let store = Arc::new(MemoryStore::new());
        let queue = open_queue(&store);

        queue.enqueue("u1", json!({"n": 1})).unwrap();
        queue.enqueue("u2", json!({"n": 2})).unwrap();
        queue.enqueue("u3", json!({"n": 3})).unwrap();
        assert_eq!(queue.count(), 3);
        assert_eq!(queue.ids(), vec!["u1", "u2", "u3"]);
    }

    #[test]
    fn coalescing_keeps_position_and_takes_latest_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let queue = open_queue(&store);

        queue.enqueue("u1", json!({"v": 1})).unwrap();
        queue.enqueue("u2", json!({"v": 1})).unwrap();
        let first_ts = queue.items()[0].saved_at;

        queue.enqueue("u1", json!({"v": 2})).unwrap();

        assert_eq!(queue.count(), 2);
        let items = queue.items();
        // Original position preserved, snapshot and timestamp replaced.
        assert_eq!(items[0].record_id, "u1");
        assert_eq!(items[0].body, json!({"v": 2}));
        assert!(items[0].saved_at >= first_ts);
        assert_eq!(items[1].record_id, "u2");
    }

    #[test]
    fn persists_before_returning() {
        let store = Arc::new(MemoryStore::new());
        let queue = open_queue(&store);

        queue.enqueue("u1", json!({"v": 1})).unwrap();
        let bytes = store.load("savequeue:books:dev-1").unwrap().unwrap();
        let persisted: PersistedQueue = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(persisted.version, QUEUE_FORMAT_VERSION);
        assert_eq!(persisted.items.len(), 1);
        assert_eq!(persisted.items[0].record_id, "u1");
    }

    #[test]
    fn reopen_restores_identical_ordered_items() {
        let store = Arc::new(MemoryStore::new());
        {
            let queue = open_queue(&store);
            queue.enqueue("b", json!({"v": 1})).unwrap();
            queue.enqueue("a", json!({"v": 2})).unwrap();
            queue.enqueue("b", json!({"v": 3})).unwrap();
        }
        let queue = open_queue(&store);
        let items = queue.items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].record_id, "b");
        assert_eq!(items[0].body, json!({"v": 3}));
        assert_eq!(items[1].record_id, "a");
    }

    #[test]
    fn remove_absent_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let queue = open_queue(&store);
        assert!(!queue.remove("ghost").unwrap());
    }

    #[test]
    fn conditional_remove_spares_coalesced_newer_write() {
        let store = Arc::new(MemoryStore::new());
        let queue = open_queue(&store);

        queue.enqueue("u1", json!({"v": 1})).unwrap();
        let stale_ts = queue.items()[0].saved_at;

        // A newer write lands while the old snapshot is in flight.
        queue.enqueue("u1", json!({"v": 2})).unwrap();

        assert!(!queue.remove_if_unchanged("u1", stale_ts).unwrap());
        assert_eq!(queue.count(), 1);
        assert_eq!(queue.items()[0].body, json!({"v": 2}));

        let current_ts = queue.items()[0].saved_at;
        assert!(queue.remove_if_unchanged("u1", current_ts).unwrap());
        assert_eq!(queue.count(), 0);
    }

    #[test]
    fn dropped_delegate_is_silently_skipped() {
        struct Recorder;
        impl SaveDelegate for Recorder {
            fn on_outcome(&self, _: &str, _: &str, _: SaveOutcome) {}
        }

        let store = Arc::new(MemoryStore::new());
        let queue = open_queue(&store);

        let delegate: Arc<dyn SaveDelegate> = Arc::new(Recorder);
        queue.set_delegate(&delegate);
        drop(delegate);

        // Must not panic and must not upgrade a dead weak reference.
        queue.notify_delegate("u1", SaveOutcome::Saved);
    }

    #[tokio::test]
    async fn enqueue_signals_work_available() {
        let store = Arc::new(MemoryStore::new());
        let queue = open_queue(&store);

        queue.enqueue("u1", json!({})).unwrap();
        // The notification permit is stored even though nobody was waiting.
        tokio::time::timeout(std::time::Duration::from_secs(1), queue.work_available())
            .await
            .expect("enqueue should have signalled work");
    }
}
