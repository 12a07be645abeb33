use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use outpost_protocol::backoff::Backoff;
use outpost_protocol::envelope::{ControlOp, ControlRequest};
use outpost_protocol::messages::{DeleteFileRequest, DeleteFileResponse};
use outpost_protocol::transport::ControlPlane;
use outpost_protocol::types::ApiError;
use outpost_store::PersistentStore;

use crate::session::{
    FileHandle, SessionEnd, SessionState, SinkMode, TransferDescriptor, TransferEvent,
    TransferSession,
};
use crate::transport::DataPlane;
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// Aggregated outcome of a batch transfer.
///
/// Partial success is reported, never masked: `completed` lists every
/// descriptor that finished, `first_error` carries the first failure in
/// submission order (if any).
#[derive(Debug)]
pub struct BatchResult {
    pub completed: Vec<FileHandle>,
    pub first_error: Option<TransferError>,
}

impl BatchResult {
    pub fn is_complete_success(&self) -> bool {
        self.first_error.is_none()
    }
}

/// Routes transfer requests to sessions and enforces at most one active
/// session per resource identity.
///
/// A second submission for a resource that is resolving or transferring is
/// rejected with [`TransferError::AlreadyInProgress`], never silently
/// queued or deduplicated. Paused sessions stay registered so they can be
/// resumed; terminal sessions are dropped from the registry.
pub struct TransferCoordinator {
    control: Arc<dyn ControlPlane>,
    data: Arc<dyn DataPlane>,
    store: Arc<dyn PersistentStore>,
    chunk_size: usize,
    backoff: Backoff,
    sessions: Mutex<HashMap<String, Arc<TransferSession>>>,
}

impl TransferCoordinator {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        data: Arc<dyn DataPlane>,
        store: Arc<dyn PersistentStore>,
    ) -> Self {
        Self {
            control,
            data,
            store,
            chunk_size: DEFAULT_CHUNK_SIZE,
            backoff: Backoff::default(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Runs a download to completion, pause, or failure.
    pub async fn download(
        &self,
        descriptor: TransferDescriptor,
        sink_mode: SinkMode,
        events_tx: mpsc::Sender<TransferEvent>,
    ) -> Result<SessionEnd, TransferError> {
        let key = descriptor.resource_key();
        let session = self.register(&key, || {
            TransferSession::download(
                descriptor,
                sink_mode,
                Arc::clone(&self.store),
                Arc::clone(&self.control),
                Arc::clone(&self.data),
                self.chunk_size,
                self.backoff.clone(),
                events_tx,
            )
        })?;

        let result = session.run().await;
        self.deregister_if_terminal(&key);
        result
    }

    /// Runs an upload to completion, pause, or failure. `source_bytes`
    /// supplies the payload for in-memory uploads.
    pub async fn upload(
        &self,
        descriptor: TransferDescriptor,
        source_bytes: Option<Vec<u8>>,
        events_tx: mpsc::Sender<TransferEvent>,
    ) -> Result<SessionEnd, TransferError> {
        let key = descriptor.resource_key();
        let session = self.register(&key, || {
            TransferSession::upload(
                descriptor,
                source_bytes,
                Arc::clone(&self.store),
                Arc::clone(&self.control),
                Arc::clone(&self.data),
                self.chunk_size,
                self.backoff.clone(),
                events_tx,
            )
        })?;

        let result = session.run().await;
        self.deregister_if_terminal(&key);
        result
    }

    /// Fans a batch of downloads out into independent sessions and
    /// aggregates their outcomes in submission order.
    pub async fn download_batch(
        self: Arc<Self>,
        descriptors: Vec<TransferDescriptor>,
        sink_mode: SinkMode,
        events_tx: mpsc::Sender<TransferEvent>,
    ) -> BatchResult {
        let mut slots: Vec<Option<Result<SessionEnd, TransferError>>> = Vec::new();
        slots.resize_with(descriptors.len(), || None);

        let mut tasks = JoinSet::new();
        for (index, descriptor) in descriptors.into_iter().enumerate() {
            let coordinator = Arc::clone(&self);
            let events_tx = events_tx.clone();
            tasks.spawn(async move {
                let result = coordinator.download(descriptor, sink_mode, events_tx).await;
                (index, result)
            });
        }

        let mut join_failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => {
                    warn!(error = %e, "batch download task failed to join");
                    join_failure.get_or_insert_with(|| {
                        TransferError::Api(ApiError::permanent(
                            -1,
                            format!("transfer task failed: {e}"),
                        ))
                    });
                }
            }
        }

        let mut completed = Vec::new();
        let mut first_error = None;
        for slot in slots {
            match slot {
                Some(Ok(SessionEnd::Completed(file))) => completed.push(file),
                // A paused item is neither a success nor a failure; it can
                // be resumed individually.
                Some(Ok(SessionEnd::Paused { .. })) | None => {}
                Some(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        BatchResult {
            completed,
            first_error: first_error.or(join_failure),
        }
    }

    /// Resumes a paused session by its resource key.
    pub async fn resume(&self, resource_key: &str) -> Result<SessionEnd, TransferError> {
        let session = self
            .sessions
            .lock()
            .unwrap()
            .get(resource_key)
            .cloned()
            .ok_or_else(|| TransferError::SessionNotFound(resource_key.to_string()))?;

        if session.is_active() {
            return Err(TransferError::AlreadyInProgress(resource_key.to_string()));
        }

        let result = session.run().await;
        self.deregister_if_terminal(resource_key);
        result
    }

    /// Requests cancellation of the session for `resource_key`. The
    /// session keeps its progress and pauses. Returns `false` if no such
    /// session is registered.
    pub fn cancel(&self, resource_key: &str) -> bool {
        match self.sessions.lock().unwrap().get(resource_key) {
            Some(session) => {
                session.cancel();
                true
            }
            None => false,
        }
    }

    /// Looks up the registered session for `resource_key`.
    pub fn session(&self, resource_key: &str) -> Option<Arc<TransferSession>> {
        self.sessions.lock().unwrap().get(resource_key).cloned()
    }

    /// Deletes a file remotely. Pure control-plane call, no transfer
    /// phase; the result counts zero or one records removed.
    pub async fn delete(&self, file_id: &str) -> Result<u32, TransferError> {
        let request = ControlRequest::new(
            ControlOp::DeleteFile,
            Some(&DeleteFileRequest {
                file_id: file_id.to_string(),
            }),
        )
        .map_err(|e| {
            TransferError::Api(ApiError::permanent(
                -1,
                format!("failed to encode delete request: {e}"),
            ))
        })?;

        let response = self.control.call(request).await.map_err(TransferError::Api)?;
        let parsed: DeleteFileResponse = response
            .into_result()
            .map_err(TransferError::Api)?
            .ok_or_else(|| {
                TransferError::Api(ApiError::permanent(-1, "empty delete response"))
            })?;

        debug!(file = %file_id, count = parsed.count, "delete completed");
        Ok(parsed.count)
    }

    fn register(
        &self,
        key: &str,
        make: impl FnOnce() -> Arc<TransferSession>,
    ) -> Result<Arc<TransferSession>, TransferError> {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(existing) = sessions.get(key)
            && existing.is_active()
        {
            return Err(TransferError::AlreadyInProgress(key.to_string()));
        }
        let session = make();
        sessions.insert(key.to_string(), Arc::clone(&session));
        Ok(session)
    }

    fn deregister_if_terminal(&self, key: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get(key)
            && matches!(
                session.state(),
                SessionState::Completed | SessionState::Failed
            )
        {
            sessions.remove(key);
        }
    }
}
