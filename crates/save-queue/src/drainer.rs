use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use outpost_protocol::backoff::Backoff;
use outpost_protocol::envelope::{ControlOp, ControlRequest};
use outpost_protocol::messages::{SaveRecordRequest, SaveRecordResponse};
use outpost_protocol::transport::ControlPlane;
use outpost_protocol::types::{ApiError, RecordSnapshot};

use crate::{SaveOutcome, SaveQueue};

/// Replays a [`SaveQueue`] through the control plane.
///
/// One drainer serves one queue. Drain passes for that queue are mutually
/// exclusive by construction: the drainer is a single task, and
/// [`DrainerHandle::trigger`] collapses concurrent requests into at most
/// one active pass plus one pending pass. Different queues get their own
/// drainers and run independently.
pub struct QueueDrainer {
    queue: Arc<SaveQueue>,
    transport: Arc<dyn ControlPlane>,
    backoff: Backoff,
    trigger_rx: mpsc::Receiver<()>,
    // Keeps the trigger channel open even if every handle is dropped.
    _trigger_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
    /// Replay attempts per record, reset on any non-retryable outcome.
    attempts: HashMap<String, u32>,
}

/// Handle for triggering and shutting down a [`QueueDrainer`].
#[derive(Clone)]
pub struct DrainerHandle {
    trigger_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
}

impl DrainerHandle {
    /// Requests a drain pass. While a pass is active, at most one more is
    /// queued; further triggers are dropped. A pass is an idempotent
    /// re-scan of current queue state, so nothing is lost.
    pub fn trigger(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    /// Stops the drainer. An in-flight replay call is allowed to complete;
    /// any pending pass is dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

struct PassOutcome {
    /// Items left in place for a later pass.
    retryable: usize,
    /// Whether the pass removed at least one item.
    progressed: bool,
}

impl QueueDrainer {
    /// Creates a drainer for `queue` and returns it with its handle.
    ///
    /// Spawn [`run`](Self::run) as a background task.
    pub fn new(
        queue: Arc<SaveQueue>,
        transport: Arc<dyn ControlPlane>,
        backoff: Backoff,
    ) -> (Self, DrainerHandle) {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let handle = DrainerHandle {
            trigger_tx: trigger_tx.clone(),
            cancel: cancel.clone(),
        };

        let drainer = Self {
            queue,
            transport,
            backoff,
            trigger_rx,
            _trigger_tx: trigger_tx,
            cancel,
            attempts: HashMap::new(),
        };

        (drainer, handle)
    }

    /// Runs the drain loop until shutdown.
    ///
    /// Wakes on queue mutations and on explicit triggers; each wake drains
    /// until the queue holds no retryable leftovers, pacing repeat passes
    /// with the backoff policy.
    pub async fn run(mut self) {
        info!(collection = %self.queue.collection(), "queue drainer starting");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.queue.work_available() => {}
                _ = self.trigger_rx.recv() => {}
            }

            self.drain_until_clean().await;

            if self.cancel.is_cancelled() {
                break;
            }
        }

        info!(collection = %self.queue.collection(), "queue drainer stopped");
    }

    async fn drain_until_clean(&mut self) {
        let mut failed_passes: u32 = 0;

        loop {
            let outcome = self.drain_pass().await;
            if self.cancel.is_cancelled() || outcome.retryable == 0 {
                return;
            }

            if outcome.progressed {
                failed_passes = 0;
            }
            failed_passes += 1;

            let delay = self.backoff.delay_for_attempt(failed_passes);
            debug!(
                collection = %self.queue.collection(),
                left = outcome.retryable,
                delay_ms = delay.as_millis() as u64,
                "backing off before next drain pass"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One full pass over the current queue contents, in insertion order.
    ///
    /// A retryable failure does not block later items; per-record
    /// point-in-time ordering is already guaranteed by coalescing.
    async fn drain_pass(&mut self) -> PassOutcome {
        let items = self.queue.items();
        let mut outcome = PassOutcome {
            retryable: 0,
            progressed: false,
        };

        for item in items {
            let record_id = item.record_id.clone();
            let saved_at = item.saved_at;
            let snapshot = RecordSnapshot {
                collection: self.queue.collection().to_string(),
                record_id: record_id.clone(),
                body: item.body,
                saved_at,
            };

            match self.replay(snapshot).await {
                Ok(()) => {
                    // Remove only if no newer write coalesced in while the
                    // replay was in flight.
                    self.remove_drained(&record_id, saved_at, SaveOutcome::Saved);
                    outcome.progressed = true;
                }
                Err(err) if err.retryable => {
                    let n = self.attempts.entry(record_id.clone()).or_insert(0);
                    *n += 1;
                    if self.backoff.exhausted(*n) {
                        let attempts = *n;
                        warn!(
                            collection = %self.queue.collection(),
                            record = %record_id,
                            attempts,
                            "retry budget exhausted, dropping item"
                        );
                        let rejected = ApiError::permanent(
                            err.code,
                            format!("retry budget exhausted after {attempts} attempts: {}", err.message),
                        );
                        self.remove_drained(&record_id, saved_at, SaveOutcome::Rejected(rejected));
                        outcome.progressed = true;
                    } else {
                        debug!(
                            collection = %self.queue.collection(),
                            record = %record_id,
                            attempt = *n,
                            error = %err,
                            "retryable replay failure"
                        );
                        outcome.retryable += 1;
                        self.queue.notify_delegate(&record_id, SaveOutcome::Retry(err));
                    }
                }
                Err(err) => {
                    warn!(
                        collection = %self.queue.collection(),
                        record = %record_id,
                        error = %err,
                        "replay rejected by server"
                    );
                    self.remove_drained(&record_id, saved_at, SaveOutcome::Rejected(err));
                    outcome.progressed = true;
                }
            }

            // Shutdown lets the in-flight item finish, then ends the pass.
            if self.cancel.is_cancelled() {
                break;
            }
        }

        outcome
    }

    fn remove_drained(
        &mut self,
        record_id: &str,
        saved_at: chrono::DateTime<chrono::Utc>,
        outcome: SaveOutcome,
    ) {
        self.attempts.remove(record_id);
        match self.queue.remove_if_unchanged(record_id, saved_at) {
            Ok(_) => self.queue.notify_delegate(record_id, outcome),
            Err(e) => {
                // The outcome still reaches the delegate; the item will be
                // re-scanned (and re-confirmed) on the next pass.
                warn!(record = %record_id, error = %e, "failed to persist queue after drain");
                self.queue.notify_delegate(record_id, outcome);
            }
        }
    }

    async fn replay(&self, snapshot: RecordSnapshot) -> Result<(), ApiError> {
        let request = ControlRequest::new(ControlOp::SaveRecord, Some(&SaveRecordRequest { snapshot }))
            .map_err(|e| ApiError::permanent(-1, format!("failed to encode snapshot: {e}")))?;

        let response = self.transport.call(request).await?;
        response.into_result::<SaveRecordResponse>().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::json;

    use outpost_protocol::envelope::ControlResponse;
    use outpost_store::{MemoryStore, PersistentStore};

    use crate::SaveDelegate;

    /// Control plane scripted per record id.
    #[derive(Default)]
    struct MockControl {
        /// record_id -> queued results; an exhausted script succeeds.
        script: Mutex<HashMap<String, VecDeque<Result<(), ApiError>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockControl {
        fn script_for(&self, record_id: &str, results: Vec<Result<(), ApiError>>) {
            self.script
                .lock()
                .unwrap()
                .insert(record_id.to_string(), results.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ControlPlane for MockControl {
        fn call(
            &self,
            request: ControlRequest,
        ) -> Pin<Box<dyn Future<Output = Result<ControlResponse, ApiError>> + Send + '_>> {
            let save: SaveRecordRequest = request.parse_payload().unwrap().unwrap();
            let record_id = save.snapshot.record_id;
            self.calls.lock().unwrap().push(record_id.clone());

            let scripted = self
                .script
                .lock()
                .unwrap()
                .get_mut(&record_id)
                .and_then(|q| q.pop_front())
                .unwrap_or(Ok(()));

            let id = request.id;
            Box::pin(async move {
                match scripted {
                    Ok(()) => Ok(ControlResponse::ok(
                        id,
                        Some(&SaveRecordResponse { record_id }),
                    )
                    .unwrap()),
                    Err(e) => Ok(ControlResponse::fail(id, e)),
                }
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        outcomes: Mutex<Vec<(String, SaveOutcome)>>,
    }

    impl Recorder {
        fn outcomes(&self) -> Vec<(String, SaveOutcome)> {
            self.outcomes.lock().unwrap().clone()
        }
    }

    impl SaveDelegate for Recorder {
        fn on_outcome(&self, _collection: &str, record_id: &str, outcome: SaveOutcome) {
            self.outcomes
                .lock()
                .unwrap()
                .push((record_id.to_string(), outcome));
        }
    }

    fn setup() -> (
        Arc<SaveQueue>,
        Arc<MockControl>,
        Arc<Recorder>,
        QueueDrainer,
        DrainerHandle,
    ) {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        let queue = SaveQueue::open("books", "dev-1", store).unwrap();
        let control = Arc::new(MockControl::default());
        let recorder = Arc::new(Recorder::default());

        // The weak registration stays live as long as `recorder` does.
        let delegate: Arc<dyn SaveDelegate> = Arc::clone(&recorder) as _;
        queue.set_delegate(&delegate);

        let (drainer, handle) = QueueDrainer::new(
            Arc::clone(&queue),
            Arc::clone(&control) as Arc<dyn ControlPlane>,
            Backoff {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(8),
                factor: 2.0,
                max_attempts: 3,
            },
        );
        (queue, control, recorder, drainer, handle)
    }

    #[tokio::test]
    async fn pass_replays_in_insertion_order_and_empties_queue() {
        let (queue, control, recorder, mut drainer, _handle) = setup();

        queue.enqueue("u1", json!({"v": 1})).unwrap();
        queue.enqueue("u2", json!({"v": 2})).unwrap();
        queue.enqueue("u3", json!({"v": 3})).unwrap();

        let outcome = drainer.drain_pass().await;
        assert_eq!(outcome.retryable, 0);
        assert!(outcome.progressed);

        assert_eq!(control.calls(), vec!["u1", "u2", "u3"]);
        assert_eq!(queue.count(), 0);
        assert_eq!(
            recorder.outcomes(),
            vec![
                ("u1".into(), SaveOutcome::Saved),
                ("u2".into(), SaveOutcome::Saved),
                ("u3".into(), SaveOutcome::Saved),
            ]
        );
    }

    #[tokio::test]
    async fn retryable_failure_keeps_item_without_blocking_later_ones() {
        let (queue, control, recorder, mut drainer, _handle) = setup();

        queue.enqueue("a", json!({})).unwrap();
        queue.enqueue("b", json!({})).unwrap();
        control.script_for("b", vec![Err(ApiError::transient(503, "timeout"))]);

        let outcome = drainer.drain_pass().await;
        assert_eq!(outcome.retryable, 1);

        // A succeeded and left; B stayed for the next pass.
        assert_eq!(queue.ids(), vec!["b"]);
        let outcomes = recorder.outcomes();
        assert_eq!(outcomes[0], ("a".into(), SaveOutcome::Saved));
        assert!(matches!(outcomes[1], (ref id, SaveOutcome::Retry(_)) if id == "b"));
    }

    #[tokio::test]
    async fn permanent_rejection_removes_item() {
        let (queue, control, recorder, mut drainer, _handle) = setup();

        queue.enqueue("u1", json!({})).unwrap();
        queue.enqueue("u2", json!({})).unwrap();
        control.script_for("u2", vec![Err(ApiError::permanent(400, "validation"))]);

        let outcome = drainer.drain_pass().await;
        assert_eq!(outcome.retryable, 0);

        assert_eq!(queue.count(), 0);
        let outcomes = recorder.outcomes();
        assert_eq!(outcomes[0], ("u1".into(), SaveOutcome::Saved));
        assert!(
            matches!(outcomes[1], (ref id, SaveOutcome::Rejected(ref e)) if id == "u2" && e.code == 400)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_exhaustion_drops_item_as_rejected() {
        let (queue, control, recorder, mut drainer, _handle) = setup();

        queue.enqueue("u1", json!({})).unwrap();
        // Fails transiently forever: more failures scripted than the budget.
        control.script_for(
            "u1",
            std::iter::repeat_with(|| Err(ApiError::transient(503, "down")))
                .take(10)
                .collect(),
        );

        drainer.drain_until_clean().await;

        assert_eq!(queue.count(), 0);
        let outcomes = recorder.outcomes();
        // Two retries, then rejection on the third (max_attempts = 3).
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0].1, SaveOutcome::Retry(_)));
        assert!(matches!(outcomes[1].1, SaveOutcome::Retry(_)));
        match &outcomes[2].1 {
            SaveOutcome::Rejected(e) => {
                assert!(e.message.contains("retry budget exhausted"));
                assert!(!e.retryable);
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_drains_on_enqueue_and_on_trigger() {
        let (queue, _control, recorder, drainer, handle) = setup();

        let task = tokio::spawn(drainer.run());

        queue.enqueue("u1", json!({})).unwrap();
        // The run loop wakes from the queue's own notification.
        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.count() > 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("queue should drain after enqueue");

        queue.enqueue("u2", json!({})).unwrap();
        handle.trigger();
        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.count() > 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("queue should drain after trigger");

        assert_eq!(recorder.outcomes().len(), 2);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn redundant_triggers_collapse() {
        let (_queue, _control, _recorder, _drainer, handle) = setup();
        // With no drainer task consuming, the channel holds one pending
        // trigger and drops the rest without blocking or panicking.
        for _ in 0..16 {
            handle.trigger();
        }
    }

    #[tokio::test]
    async fn success_for_stale_snapshot_keeps_newer_coalesced_write() {
        let (queue, control, recorder, mut drainer, _handle) = setup();

        queue.enqueue("u1", json!({"v": 1})).unwrap();
        // First replay fails transiently; before the second pass a newer
        // write coalesces in.
        control.script_for("u1", vec![Err(ApiError::transient(503, "drop"))]);

        let outcome = drainer.drain_pass().await;
        assert_eq!(outcome.retryable, 1);

        queue.enqueue("u1", json!({"v": 2})).unwrap();

        let outcome = drainer.drain_pass().await;
        assert_eq!(outcome.retryable, 0);
        assert_eq!(queue.count(), 0);

        // The second pass replayed the newer snapshot.
        assert_eq!(control.calls().len(), 2);
        let outcomes = recorder.outcomes();
        assert!(matches!(outcomes.last().unwrap().1, SaveOutcome::Saved));
    }
}
