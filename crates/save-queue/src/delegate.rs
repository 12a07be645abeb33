use outpost_protocol::types::ApiError;

/// Per-item replay outcome delivered to a queue's delegate.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// The server accepted the mutation; the item left the queue.
    Saved,
    /// Transient failure; the item stays queued for a later pass.
    Retry(ApiError),
    /// The server rejected the mutation (or the retry budget ran out);
    /// the item was dropped.
    Rejected(ApiError),
}

/// Observer notified of per-item replay outcomes.
///
/// Registered via [`SaveQueue::set_delegate`](crate::SaveQueue::set_delegate)
/// and held as a weak reference: the queue never extends the observer's
/// lifetime, and outcomes for a dropped delegate are silently discarded.
pub trait SaveDelegate: Send + Sync {
    fn on_outcome(&self, collection: &str, record_id: &str, outcome: SaveOutcome);
}
