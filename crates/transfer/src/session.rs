use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use outpost_protocol::backoff::Backoff;
use outpost_protocol::envelope::{ControlOp, ControlRequest};
use outpost_protocol::messages::{
    ResolveDownloadRequest, ResolveDownloadResponse, ResolveUploadRequest, ResolveUploadResponse,
};
use outpost_protocol::transport::ControlPlane;
use outpost_protocol::types::{ApiError, ResolvedLocation};
use outpost_store::PersistentStore;

use crate::TransferError;
use crate::checkpoint::TransferCheckpoint;
use crate::chunk::{ChunkSource, PartSink};
use crate::transport::DataPlane;

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// Where downloaded bytes land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    /// Into a `.part` file that is atomically renamed on completion.
    Disk,
    /// Into memory; no durable partial data, so no cross-restart resume.
    Memory,
}

/// Session lifecycle.
///
/// `Paused` is resumable; `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Resolving,
    Transferring,
    Paused,
    Completed,
    Failed,
}

/// Everything a session needs to move one resource.
///
/// `resume_offset` counts bytes already transferred and verified
/// contiguous; it never exceeds `total_length`. A `location` past its
/// expiry is treated as absent.
#[derive(Debug, Clone)]
pub struct TransferDescriptor {
    /// Resource identity. Empty for uploads until the server assigns one.
    pub file_id: String,
    pub file_name: String,
    /// Source path for uploads, destination path for disk downloads.
    pub local_path: PathBuf,
    /// Declared length in bytes; 0 = unknown until resolved.
    pub total_length: u64,
    pub mime_type: String,
    pub resume_offset: u64,
    pub public: bool,
    pub location: Option<ResolvedLocation>,
}

impl TransferDescriptor {
    /// Identity key used for at-most-one-active-session enforcement.
    pub fn resource_key(&self) -> String {
        if self.file_id.is_empty() {
            Self::key_for_name(&self.file_name)
        } else {
            Self::key_for_id(&self.file_id)
        }
    }

    /// Resource key for a known file id.
    pub fn key_for_id(file_id: &str) -> String {
        format!("id:{file_id}")
    }

    /// Resource key for a file addressed by name.
    pub fn key_for_name(file_name: &str) -> String {
        format!("name:{file_name}")
    }

    /// Rebuilds a descriptor from a persisted checkpoint.
    pub fn from_checkpoint(checkpoint: TransferCheckpoint) -> Self {
        Self {
            file_id: checkpoint.file_id,
            file_name: checkpoint.file_name,
            local_path: checkpoint.local_path,
            total_length: checkpoint.total_length,
            mime_type: checkpoint.mime_type,
            resume_offset: checkpoint.offset,
            public: false,
            location: checkpoint.location,
        }
    }
}

/// The completed resource as handed back to the caller.
#[derive(Debug, Clone)]
pub struct FileHandle {
    pub file_id: String,
    pub file_name: String,
    /// Set for disk downloads and file uploads.
    pub local_path: Option<PathBuf>,
    /// Set for in-memory downloads.
    pub data: Option<Vec<u8>>,
    pub length: u64,
    pub mime_type: String,
}

/// Events delivered over a session's channel: zero or more `Progress`,
/// then exactly one of `Completed` / `Failed`. The exception is a pause,
/// in which case `Paused` is the last event until a resume.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    Progress {
        file_id: String,
        bytes: u64,
        total: u64,
        /// Non-decreasing for the lifetime of the session.
        fraction: f64,
    },
    Paused {
        file_id: String,
        offset: u64,
    },
    Completed {
        file: FileHandle,
    },
    Failed {
        file_id: String,
        error: String,
    },
}

/// How a run ended without error.
#[derive(Debug)]
pub enum SessionEnd {
    Completed(FileHandle),
    /// Resumable; `offset` bytes are transferred and durable.
    Paused { offset: u64 },
}

/// Outcome of a step that may legitimately suspend the whole session.
enum Flow<T> {
    Continue(T),
    Pause,
}

enum DownloadSink {
    Disk(PartSink),
    Memory(Vec<u8>),
}

impl DownloadSink {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), TransferError> {
        match self {
            Self::Disk(sink) => sink.write_at(offset, data),
            Self::Memory(buf) => {
                debug_assert_eq!(buf.len() as u64, offset);
                buf.extend_from_slice(data);
                Ok(())
            }
        }
    }

    fn sync(&mut self) -> Result<(), TransferError> {
        match self {
            Self::Disk(sink) => sink.sync(),
            Self::Memory(_) => Ok(()),
        }
    }

    fn discard(self) {
        if let Self::Disk(sink) = self {
            sink.discard();
        }
    }
}

/// State machine for one upload or one download.
///
/// A session may be run, pause (explicitly or after exhausting transient
/// retries), and be run again; every run resumes from the durable offset.
/// `Completed` and `Failed` end the session for good.
pub struct TransferSession {
    id: String,
    direction: Direction,
    sink_mode: SinkMode,
    store: Arc<dyn PersistentStore>,
    control: Arc<dyn ControlPlane>,
    data: Arc<dyn DataPlane>,
    chunk_size: usize,
    backoff: Backoff,
    cancel: Mutex<CancellationToken>,
    state: Mutex<SessionState>,
    descriptor: Mutex<TransferDescriptor>,
    /// Source buffer for in-memory uploads.
    source_bytes: Option<Vec<u8>>,
    events_tx: mpsc::Sender<TransferEvent>,
    last_fraction: Mutex<f64>,
}

impl TransferSession {
    /// Creates a download session.
    #[allow(clippy::too_many_arguments)]
    pub fn download(
        descriptor: TransferDescriptor,
        sink_mode: SinkMode,
        store: Arc<dyn PersistentStore>,
        control: Arc<dyn ControlPlane>,
        data: Arc<dyn DataPlane>,
        chunk_size: usize,
        backoff: Backoff,
        events_tx: mpsc::Sender<TransferEvent>,
    ) -> Arc<Self> {
        Self::new(
            Direction::Download,
            sink_mode,
            descriptor,
            None,
            store,
            control,
            data,
            chunk_size,
            backoff,
            events_tx,
        )
    }

    /// Creates an upload session. `source_bytes` supplies the payload for
    /// in-memory uploads; otherwise the descriptor's `local_path` is read.
    #[allow(clippy::too_many_arguments)]
    pub fn upload(
        descriptor: TransferDescriptor,
        source_bytes: Option<Vec<u8>>,
        store: Arc<dyn PersistentStore>,
        control: Arc<dyn ControlPlane>,
        data: Arc<dyn DataPlane>,
        chunk_size: usize,
        backoff: Backoff,
        events_tx: mpsc::Sender<TransferEvent>,
    ) -> Arc<Self> {
        Self::new(
            Direction::Upload,
            SinkMode::Disk,
            descriptor,
            source_bytes,
            store,
            control,
            data,
            chunk_size,
            backoff,
            events_tx,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        direction: Direction,
        sink_mode: SinkMode,
        descriptor: TransferDescriptor,
        source_bytes: Option<Vec<u8>>,
        store: Arc<dyn PersistentStore>,
        control: Arc<dyn ControlPlane>,
        data: Arc<dyn DataPlane>,
        chunk_size: usize,
        backoff: Backoff,
        events_tx: mpsc::Sender<TransferEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            direction,
            sink_mode,
            store,
            control,
            data,
            chunk_size: if chunk_size == 0 {
                crate::DEFAULT_CHUNK_SIZE
            } else {
                chunk_size
            },
            backoff,
            cancel: Mutex::new(CancellationToken::new()),
            state: Mutex::new(SessionState::Created),
            descriptor: Mutex::new(descriptor),
            source_bytes,
            events_tx,
            last_fraction: Mutex::new(0.0),
        })
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// `true` while the session holds (or is about to hold) the resource.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Created | SessionState::Resolving | SessionState::Transferring
        )
    }

    /// Point-in-time copy of the descriptor.
    pub fn descriptor(&self) -> TransferDescriptor {
        self.descriptor.lock().unwrap().clone()
    }

    /// Requests cancellation. The session keeps its progress and
    /// transitions to `Paused` rather than `Failed`.
    pub fn cancel(&self) {
        self.cancel.lock().unwrap().cancel();
    }

    /// Drives the transfer until it completes, pauses, or fails.
    ///
    /// Legal entry states are `Created` and `Paused`; terminal sessions
    /// reject the call.
    pub async fn run(&self) -> Result<SessionEnd, TransferError> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                SessionState::Created | SessionState::Paused => {
                    *state = SessionState::Resolving;
                }
                other => return Err(TransferError::NotRunnable(other)),
            }
        }
        // A cancel that caused an earlier pause must not stop this run.
        self.reset_cancel();

        let result = match self.direction {
            Direction::Download => self.run_download().await,
            Direction::Upload => self.run_upload().await,
        };

        let file_id = self.descriptor.lock().unwrap().file_id.clone();
        match &result {
            Ok(SessionEnd::Completed(file)) => {
                self.set_state(SessionState::Completed);
                self.clear_checkpoint();
                info!(session = %self.id, file = %file_id, "transfer completed");
                self.emit(TransferEvent::Completed { file: file.clone() }).await;
            }
            Ok(SessionEnd::Paused { offset }) => {
                self.set_state(SessionState::Paused);
                debug!(session = %self.id, file = %file_id, offset, "transfer paused");
                self.emit(TransferEvent::Paused {
                    file_id,
                    offset: *offset,
                })
                .await;
            }
            Err(e) => {
                self.set_state(SessionState::Failed);
                self.clear_checkpoint();
                warn!(session = %self.id, file = %file_id, error = %e, "transfer failed");
                self.emit(TransferEvent::Failed {
                    file_id,
                    error: e.to_string(),
                })
                .await;
            }
        }
        result
    }

    // -----------------------------------------------------------------------
    // Download
    // -----------------------------------------------------------------------

    async fn run_download(&self) -> Result<SessionEnd, TransferError> {
        match self.fresh_location().await? {
            Flow::Continue(_) => {}
            Flow::Pause => {
                let offset = self.descriptor.lock().unwrap().resume_offset;
                return Ok(SessionEnd::Paused { offset });
            }
        }

        let (dest, mut offset, mut total) = {
            let d = self.descriptor.lock().unwrap();
            (d.local_path.clone(), d.resume_offset, d.total_length)
        };

        let mut sink = match self.sink_mode {
            SinkMode::Disk => {
                let (mut sink, existing) = PartSink::open(&dest)?;
                // Never trust an offset beyond the bytes actually on disk,
                // and drop anything past the verified-contiguous point.
                if offset > existing {
                    offset = existing;
                    self.sync_offset(offset);
                }
                sink.truncate(offset)?;
                DownloadSink::Disk(sink)
            }
            SinkMode::Memory => {
                // No durable partial data: memory downloads start over.
                offset = 0;
                self.sync_offset(0);
                DownloadSink::Memory(Vec::with_capacity(total as usize))
            }
        };

        loop {
            if self.cancelled() {
                return self.pause_download(sink, offset);
            }
            if total > 0 && offset >= total {
                break;
            }

            let location = match self.fresh_location().await? {
                Flow::Continue(location) => location,
                Flow::Pause => return self.pause_download(sink, offset),
            };

            let want = if total > 0 {
                (total - offset).min(self.chunk_size as u64) as usize
            } else {
                self.chunk_size
            };

            let mut attempt = 0u32;
            let bytes = loop {
                match self.data.fetch_range(&location, offset, want).await {
                    Ok(bytes) => break bytes,
                    Err(e) if e.retryable => {
                        attempt += 1;
                        if self.backoff.exhausted(attempt) {
                            warn!(
                                session = %self.id,
                                attempts = attempt,
                                "data plane retry budget exhausted, pausing"
                            );
                            return self.pause_download(sink, offset);
                        }
                        debug!(session = %self.id, attempt, error = %e, "retrying fetch");
                        if !self.retry_delay(attempt).await {
                            return self.pause_download(sink, offset);
                        }
                    }
                    Err(e) => {
                        sink.discard();
                        return Err(e.into());
                    }
                }
            };

            if bytes.is_empty() {
                if total > 0 && offset < total {
                    // The remote ran out before the declared length.
                    sink.discard();
                    return Err(TransferError::LengthMismatch {
                        declared: total,
                        observed: offset,
                    });
                }
                // Unknown total: a clean end of stream defines it.
                total = offset;
                self.set_total(total);
                break;
            }

            let new_offset = offset + bytes.len() as u64;
            if total > 0 && new_offset > total {
                sink.discard();
                return Err(TransferError::LengthMismatch {
                    declared: total,
                    observed: new_offset,
                });
            }

            sink.write_at(offset, &bytes)?;
            offset = new_offset;
            self.sync_offset(offset);
            self.save_checkpoint()?;
            self.emit_progress(offset, total).await;
        }

        // Final fraction for streams whose length was unknown up front.
        if offset == total {
            self.emit_progress(offset, total).await;
        }

        let (local_path, data) = match sink {
            DownloadSink::Disk(sink) => (Some(sink.finalize()?), None),
            DownloadSink::Memory(buf) => (None, Some(buf)),
        };

        let d = self.descriptor.lock().unwrap();
        Ok(SessionEnd::Completed(FileHandle {
            file_id: d.file_id.clone(),
            file_name: d.file_name.clone(),
            local_path,
            data,
            length: total,
            mime_type: d.mime_type.clone(),
        }))
    }

    fn pause_download(
        &self,
        mut sink: DownloadSink,
        offset: u64,
    ) -> Result<SessionEnd, TransferError> {
        sink.sync()?;
        drop(sink);
        self.sync_offset(offset);
        self.save_checkpoint()?;
        Ok(SessionEnd::Paused { offset })
    }

    // -----------------------------------------------------------------------
    // Upload
    // -----------------------------------------------------------------------

    async fn run_upload(&self) -> Result<SessionEnd, TransferError> {
        match self.fresh_location().await? {
            Flow::Continue(_) => {}
            Flow::Pause => {
                let offset = self.descriptor.lock().unwrap().resume_offset;
                return Ok(SessionEnd::Paused { offset });
            }
        }

        let (path, mut offset, total) = {
            let d = self.descriptor.lock().unwrap();
            (d.local_path.clone(), d.resume_offset, d.total_length)
        };

        let mut source = match &self.source_bytes {
            Some(bytes) => ChunkSource::from_bytes(bytes.clone(), self.chunk_size),
            None => ChunkSource::open(&path, self.chunk_size)?,
        };

        // The local source must still match what was declared; anything
        // else means it changed since the transfer was set up.
        if source.len() != total || offset > total {
            return Err(TransferError::LengthMismatch {
                declared: total,
                observed: if source.len() != total {
                    source.len()
                } else {
                    offset
                },
            });
        }
        source.seek_to(offset)?;

        loop {
            if self.cancelled() {
                return self.pause_upload(offset);
            }

            let Some(chunk) = source.next_chunk()? else {
                break;
            };

            let location = match self.fresh_location().await? {
                Flow::Continue(location) => location,
                Flow::Pause => return self.pause_upload(offset),
            };

            let mut attempt = 0u32;
            loop {
                match self
                    .data
                    .send_range(&location, chunk.offset, &chunk.data, total)
                    .await
                {
                    Ok(()) => break,
                    Err(e) if e.retryable => {
                        attempt += 1;
                        if self.backoff.exhausted(attempt) {
                            warn!(
                                session = %self.id,
                                attempts = attempt,
                                "data plane retry budget exhausted, pausing"
                            );
                            return self.pause_upload(offset);
                        }
                        debug!(session = %self.id, attempt, error = %e, "retrying send");
                        if !self.retry_delay(attempt).await {
                            return self.pause_upload(offset);
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            offset = chunk.offset + chunk.data.len() as u64;
            self.sync_offset(offset);
            self.save_checkpoint()?;
            self.emit_progress(offset, total).await;
        }

        if offset != total {
            return Err(TransferError::LengthMismatch {
                declared: total,
                observed: offset,
            });
        }

        let d = self.descriptor.lock().unwrap();
        Ok(SessionEnd::Completed(FileHandle {
            file_id: d.file_id.clone(),
            file_name: d.file_name.clone(),
            local_path: self.source_bytes.is_none().then(|| d.local_path.clone()),
            data: None,
            length: total,
            mime_type: d.mime_type.clone(),
        }))
    }

    fn pause_upload(&self, offset: u64) -> Result<SessionEnd, TransferError> {
        self.sync_offset(offset);
        self.save_checkpoint()?;
        Ok(SessionEnd::Paused { offset })
    }

    // -----------------------------------------------------------------------
    // Location resolution
    // -----------------------------------------------------------------------

    /// Returns a usable location, resolving through the control plane when
    /// none is held or the held one has expired.
    async fn fresh_location(&self) -> Result<Flow<ResolvedLocation>, TransferError> {
        let existing = self.descriptor.lock().unwrap().location.clone();
        if let Some(location) = existing {
            if !location.is_expired() {
                self.set_state(SessionState::Transferring);
                return Ok(Flow::Continue(location));
            }
            debug!(session = %self.id, "resolved location expired, re-resolving");
        }

        self.set_state(SessionState::Resolving);
        let flow = match self.direction {
            Direction::Download => self.resolve_download().await?,
            Direction::Upload => self.resolve_upload().await?,
        };
        match flow {
            Flow::Pause => Ok(Flow::Pause),
            Flow::Continue(location) => {
                self.set_state(SessionState::Transferring);
                Ok(Flow::Continue(location))
            }
        }
    }

    async fn resolve_download(&self) -> Result<Flow<ResolvedLocation>, TransferError> {
        let payload = {
            let d = self.descriptor.lock().unwrap();
            if d.file_id.is_empty() {
                ResolveDownloadRequest::by_name(&d.file_name)
            } else {
                ResolveDownloadRequest::by_id(&d.file_id)
            }
        };

        let response: ResolveDownloadResponse =
            match self.call_control(ControlOp::ResolveDownload, &payload).await? {
                Flow::Continue(response) => response,
                Flow::Pause => return Ok(Flow::Pause),
            };

        let location = response.location.clone();
        {
            let mut d = self.descriptor.lock().unwrap();
            let meta = &response.metadata;
            if d.file_id.is_empty() {
                d.file_id = meta.file_id.clone();
            }
            if d.file_name.is_empty() {
                d.file_name = meta.file_name.clone();
            }
            if d.mime_type.is_empty() {
                d.mime_type = meta.mime_type.clone();
            }
            // A partial download is only resumable against an unchanged
            // remote file.
            if d.total_length > 0 && d.resume_offset > 0 && meta.length != d.total_length {
                return Err(TransferError::LengthMismatch {
                    declared: d.total_length,
                    observed: meta.length,
                });
            }
            d.total_length = meta.length;
            if d.resume_offset > d.total_length {
                return Err(TransferError::LengthMismatch {
                    declared: d.total_length,
                    observed: d.resume_offset,
                });
            }
            d.location = Some(location.clone());
        }
        self.save_checkpoint()?;
        Ok(Flow::Continue(location))
    }

    async fn resolve_upload(&self) -> Result<Flow<ResolvedLocation>, TransferError> {
        let payload = {
            let d = self.descriptor.lock().unwrap();
            ResolveUploadRequest {
                file_name: d.file_name.clone(),
                file_id: (!d.file_id.is_empty()).then(|| d.file_id.clone()),
                mime_type: d.mime_type.clone(),
                length: d.total_length,
                public: d.public,
            }
        };

        let response: ResolveUploadResponse =
            match self.call_control(ControlOp::ResolveUpload, &payload).await? {
                Flow::Continue(response) => response,
                Flow::Pause => return Ok(Flow::Pause),
            };

        let location = response.location.clone();
        {
            let mut d = self.descriptor.lock().unwrap();
            d.file_id = response.metadata.file_id.clone();
            if d.file_name.is_empty() {
                d.file_name = response.metadata.file_name.clone();
            }
            d.location = Some(location.clone());
        }
        self.save_checkpoint()?;
        Ok(Flow::Continue(location))
    }

    /// One control call with transient-failure retries.
    async fn call_control<Req, Resp>(
        &self,
        op: ControlOp,
        payload: &Req,
    ) -> Result<Flow<Resp>, TransferError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let mut attempt = 0u32;
        loop {
            let request = ControlRequest::new(op, Some(payload)).map_err(|e| {
                TransferError::Api(ApiError::permanent(
                    -1,
                    format!("failed to encode control request: {e}"),
                ))
            })?;

            let outcome = match self.control.call(request).await {
                Ok(response) => match response.into_result::<Resp>() {
                    Ok(Some(parsed)) => Ok(parsed),
                    Ok(None) => Err(ApiError::permanent(-1, "empty control response")),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };

            match outcome {
                Ok(parsed) => return Ok(Flow::Continue(parsed)),
                Err(e) if e.retryable => {
                    attempt += 1;
                    if self.backoff.exhausted(attempt) {
                        warn!(
                            session = %self.id,
                            attempts = attempt,
                            "control plane retry budget exhausted, pausing"
                        );
                        return Ok(Flow::Pause);
                    }
                    debug!(session = %self.id, attempt, error = %e, "retrying control call");
                    if !self.retry_delay(attempt).await {
                        return Ok(Flow::Pause);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Shared plumbing
    // -----------------------------------------------------------------------

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    fn sync_offset(&self, offset: u64) {
        self.descriptor.lock().unwrap().resume_offset = offset;
    }

    fn set_total(&self, total: u64) {
        self.descriptor.lock().unwrap().total_length = total;
    }

    fn cancelled(&self) -> bool {
        self.cancel.lock().unwrap().is_cancelled()
    }

    fn reset_cancel(&self) {
        let mut cancel = self.cancel.lock().unwrap();
        if cancel.is_cancelled() {
            *cancel = CancellationToken::new();
        }
    }

    /// Sleeps the backoff delay for `attempt`; `false` means a cancel
    /// arrived first.
    async fn retry_delay(&self, attempt: u32) -> bool {
        let delay = self.backoff.delay_for_attempt(attempt);
        let cancel = self.cancel.lock().unwrap().clone();
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Checkpoints make sense only where a restart could resume: disk
    /// downloads and file-backed uploads.
    fn checkpointing(&self) -> bool {
        match self.direction {
            Direction::Download => self.sink_mode == SinkMode::Disk,
            Direction::Upload => self.source_bytes.is_none(),
        }
    }

    fn save_checkpoint(&self) -> Result<(), TransferError> {
        if !self.checkpointing() {
            return Ok(());
        }
        let checkpoint = {
            let d = self.descriptor.lock().unwrap();
            let mut checkpoint = TransferCheckpoint::new(
                d.file_id.clone(),
                d.file_name.clone(),
                d.local_path.clone(),
                d.total_length,
                d.mime_type.clone(),
            );
            checkpoint.offset = d.resume_offset;
            checkpoint.location = d.location.clone();
            checkpoint
        };
        checkpoint.save(self.store.as_ref())
    }

    fn clear_checkpoint(&self) {
        if !self.checkpointing() {
            return;
        }
        let (file_id, local_path) = {
            let d = self.descriptor.lock().unwrap();
            (d.file_id.clone(), d.local_path.clone())
        };
        if let Err(e) = TransferCheckpoint::clear(self.store.as_ref(), &file_id, &local_path) {
            warn!(session = %self.id, error = %e, "failed to clear checkpoint");
        }
    }

    async fn emit_progress(&self, bytes: u64, total: u64) {
        let fraction = if total > 0 {
            (bytes as f64 / total as f64).min(1.0)
        } else {
            0.0
        };
        let fraction = {
            let mut last = self.last_fraction.lock().unwrap();
            if fraction > *last {
                *last = fraction;
            }
            *last
        };
        let file_id = self.descriptor.lock().unwrap().file_id.clone();
        self.emit(TransferEvent::Progress {
            file_id,
            bytes,
            total,
            fraction,
        })
        .await;
    }

    async fn emit(&self, event: TransferEvent) {
        let _ = self.events_tx.send(event).await;
    }
}
