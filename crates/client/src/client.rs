use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info};

use outpost_protocol::backoff::Backoff;
use outpost_protocol::envelope::{ControlOp, ControlRequest};
use outpost_protocol::messages::{
    FileQuery, QueryFilesRequest, QueryFilesResponse, ResolveDownloadRequest,
    ResolveDownloadResponse,
};
use outpost_protocol::transport::ControlPlane;
use outpost_protocol::types::{ApiError, FileMetadata, ResolvedLocation};
use outpost_save_queue::{DrainerHandle, QueueDrainer, QueueItem, SaveDelegate, SaveQueue};
use outpost_store::{DirStore, PersistentStore};
use outpost_transfer::{
    BatchResult, DataPlane, FileHandle, SessionEnd, SinkMode, TransferCheckpoint,
    TransferCoordinator, TransferDescriptor, TransferError, TransferEvent, part_path_for,
};

use crate::ClientError;
use crate::config::{ClientConfig, DownloadOptions, FileSelector, UploadOptions};
use crate::http::HttpTransport;
use crate::mime::{OCTET_STREAM, mime_for_path};

/// A file addressed by id or by name.
#[derive(Debug, Clone)]
pub enum FileRef {
    Id(String),
    Name(String),
}

#[derive(Clone)]
struct QueueEntry {
    queue: Arc<SaveQueue>,
    drainer: DrainerHandle,
}

/// Application-facing client.
///
/// One instance owns the durable store, the transport, a save queue (and
/// drainer) per collection, and the transfer coordinator.
pub struct OutpostClient {
    config: ClientConfig,
    store: Arc<dyn PersistentStore>,
    control: Arc<dyn ControlPlane>,
    coordinator: Arc<TransferCoordinator>,
    queues: Mutex<HashMap<String, QueueEntry>>,
}

impl OutpostClient {
    /// Connects with the default HTTP transport and a directory store
    /// under the configured data directory.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        let store: Arc<dyn PersistentStore> =
            Arc::new(DirStore::open(config.data_dir.join("state"))?);
        Self::with_parts(
            config,
            store,
            Arc::clone(&transport) as Arc<dyn ControlPlane>,
            transport as Arc<dyn DataPlane>,
        )
    }

    /// Assembles a client from explicit parts; used to substitute custom
    /// stores or transports.
    pub fn with_parts(
        config: ClientConfig,
        store: Arc<dyn PersistentStore>,
        control: Arc<dyn ControlPlane>,
        data: Arc<dyn DataPlane>,
    ) -> Result<Self, ClientError> {
        let mut coordinator =
            TransferCoordinator::new(Arc::clone(&control), data, Arc::clone(&store));
        if config.chunk_size > 0 {
            coordinator = coordinator.with_chunk_size(config.chunk_size);
        }

        Ok(Self {
            config,
            store,
            control,
            coordinator: Arc::new(coordinator),
            queues: Mutex::new(HashMap::new()),
        })
    }

    // -----------------------------------------------------------------------
    // Offline saves
    // -----------------------------------------------------------------------

    /// Queues a record mutation for replay. Coalesces with any pending
    /// write to the same record and persists before returning.
    pub fn enqueue_save(
        &self,
        collection: &str,
        record_id: &str,
        body: serde_json::Value,
    ) -> Result<(), ClientError> {
        let entry = self.queue_entry(collection)?;
        entry.queue.enqueue(record_id, body)?;
        Ok(())
    }

    /// Record ids queued for `collection`, in replay order.
    pub fn queued_ids(&self, collection: &str) -> Result<Vec<String>, ClientError> {
        Ok(self.queue_entry(collection)?.queue.ids())
    }

    /// Queued items for `collection`, in replay order.
    pub fn queued_records(&self, collection: &str) -> Result<Vec<QueueItem>, ClientError> {
        Ok(self.queue_entry(collection)?.queue.items())
    }

    /// Number of records queued for `collection`.
    pub fn queue_count(&self, collection: &str) -> Result<usize, ClientError> {
        Ok(self.queue_entry(collection)?.queue.count())
    }

    /// Registers the per-item outcome observer for `collection`. Held
    /// weakly; dropping the delegate unregisters it.
    pub fn set_save_delegate(
        &self,
        collection: &str,
        delegate: &Arc<dyn SaveDelegate>,
    ) -> Result<(), ClientError> {
        self.queue_entry(collection)?.queue.set_delegate(delegate);
        Ok(())
    }

    /// Requests a drain pass for `collection` right now (for example when
    /// the application observes connectivity returning).
    pub fn sync_now(&self, collection: &str) -> Result<(), ClientError> {
        self.queue_entry(collection)?.drainer.trigger();
        Ok(())
    }

    /// Stops all queue drainers. In-flight replay calls complete; pending
    /// passes are dropped.
    pub fn shutdown(&self) {
        for entry in self.queues.lock().unwrap().values() {
            entry.drainer.shutdown();
        }
    }

    fn queue_entry(&self, collection: &str) -> Result<QueueEntry, ClientError> {
        let mut queues = self.queues.lock().unwrap();
        if let Some(entry) = queues.get(collection) {
            return Ok(entry.clone());
        }

        let queue = SaveQueue::open(collection, &self.config.namespace, Arc::clone(&self.store))?;
        let (drainer, handle) = QueueDrainer::new(
            Arc::clone(&queue),
            Arc::clone(&self.control),
            Backoff::default(),
        );
        tokio::spawn(drainer.run());
        info!(collection, "save queue opened");

        let entry = QueueEntry {
            queue,
            drainer: handle,
        };
        queues.insert(collection.to_string(), entry.clone());
        Ok(entry)
    }

    // -----------------------------------------------------------------------
    // Uploads
    // -----------------------------------------------------------------------

    /// Uploads a local file. Progress and terminal events are delivered on
    /// `events_tx`; the returned handle carries the server-assigned
    /// identity.
    pub async fn upload_file(
        &self,
        path: &Path,
        options: UploadOptions,
        events_tx: mpsc::Sender<TransferEvent>,
    ) -> Result<FileHandle, ClientError> {
        let local = fs::metadata(path)?;
        let file_name = match options.file_name {
            Some(name) => name,
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    ClientError::InvalidConfig(format!(
                        "source path {} has no file name",
                        path.display()
                    ))
                })?,
        };
        let mime_type = options
            .mime_type
            .unwrap_or_else(|| mime_for_path(path).to_string());
        let file_id = options.file_id.unwrap_or_default();

        // A checkpoint for the same id and path means an earlier attempt
        // was interrupted; continue it rather than restarting.
        let checkpoint = if file_id.is_empty() {
            None
        } else {
            TransferCheckpoint::load(self.store.as_ref(), &file_id, path)?
        };
        let descriptor = match checkpoint {
            Some(cp) if cp.total_length == local.len() => {
                debug!(file = %cp.file_id, offset = cp.offset, "resuming interrupted upload");
                let mut d = TransferDescriptor::from_checkpoint(cp);
                d.public = options.public;
                d
            }
            _ => TransferDescriptor {
                file_id,
                file_name,
                local_path: path.to_path_buf(),
                total_length: local.len(),
                mime_type,
                resume_offset: 0,
                public: options.public,
                location: None,
            },
        };

        match self.coordinator.upload(descriptor, None, events_tx).await? {
            SessionEnd::Completed(file) => Ok(file),
            SessionEnd::Paused { offset } => Err(ClientError::Interrupted { offset }),
        }
    }

    /// Uploads in-memory bytes.
    pub async fn upload_bytes(
        &self,
        data: Vec<u8>,
        options: UploadOptions,
        events_tx: mpsc::Sender<TransferEvent>,
    ) -> Result<FileHandle, ClientError> {
        let descriptor = TransferDescriptor {
            file_id: options.file_id.unwrap_or_default(),
            file_name: options
                .file_name
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            local_path: PathBuf::new(),
            total_length: data.len() as u64,
            mime_type: options.mime_type.unwrap_or_else(|| OCTET_STREAM.to_string()),
            resume_offset: 0,
            public: options.public,
            location: None,
        };

        match self
            .coordinator
            .upload(descriptor, Some(data), events_tx)
            .await?
        {
            SessionEnd::Completed(file) => Ok(file),
            SessionEnd::Paused { offset } => Err(ClientError::Interrupted { offset }),
        }
    }

    // -----------------------------------------------------------------------
    // Downloads
    // -----------------------------------------------------------------------

    /// Downloads the selected files to disk (under `<data_dir>/downloads`
    /// unless overridden). Independent transfers run concurrently; the
    /// result reports partial success alongside the first error.
    pub async fn download_file(
        &self,
        selector: FileSelector,
        options: DownloadOptions,
        events_tx: mpsc::Sender<TransferEvent>,
    ) -> Result<BatchResult, ClientError> {
        let resolved = self.resolve_selector(&selector).await?;

        if !options.dest_names.is_empty() && options.dest_names.len() != resolved.len() {
            return Err(ClientError::DestinationArity {
                expected: resolved.len(),
                got: options.dest_names.len(),
            });
        }

        let downloads_dir = self.config.data_dir.join("downloads");
        let mut descriptors = Vec::new();
        let mut skipped = Vec::new();
        let mut resolve_error: Option<TransferError> = None;

        for (i, item) in resolved.into_iter().enumerate() {
            let (meta, location) = match item {
                Ok(target) => target,
                Err(e) => {
                    resolve_error.get_or_insert(TransferError::Api(e));
                    continue;
                }
            };

            let dest_name = options
                .dest_names
                .get(i)
                .cloned()
                .unwrap_or_else(|| meta.file_name.clone());
            let dest = downloads_dir.join(&dest_name);

            if options.only_if_newer && !server_is_newer(&meta, &dest) {
                debug!(file = %meta.file_id, "local copy is current, skipping download");
                let length = fs::metadata(&dest).map(|m| m.len()).unwrap_or(meta.length);
                skipped.push(FileHandle {
                    file_id: meta.file_id,
                    file_name: meta.file_name,
                    local_path: Some(dest),
                    data: None,
                    length,
                    mime_type: meta.mime_type,
                });
                continue;
            }

            let resume_offset = if options.resume {
                fs::metadata(part_path_for(&dest))
                    .map(|m| m.len())
                    .unwrap_or(0)
            } else {
                0
            };

            descriptors.push(TransferDescriptor {
                file_id: meta.file_id,
                file_name: meta.file_name,
                local_path: dest,
                total_length: meta.length,
                mime_type: meta.mime_type,
                resume_offset,
                public: meta.public,
                location,
            });
        }

        let mut batch = Arc::clone(&self.coordinator)
            .download_batch(descriptors, SinkMode::Disk, events_tx)
            .await;
        batch.completed.extend(skipped);
        batch.first_error = resolve_error.or(batch.first_error);
        Ok(batch)
    }

    /// Downloads the selected files to memory.
    pub async fn download_data(
        &self,
        selector: FileSelector,
        events_tx: mpsc::Sender<TransferEvent>,
    ) -> Result<BatchResult, ClientError> {
        let resolved = self.resolve_selector(&selector).await?;

        let mut descriptors = Vec::new();
        let mut resolve_error: Option<TransferError> = None;
        for item in resolved {
            match item {
                Ok((meta, location)) => descriptors.push(TransferDescriptor {
                    file_id: meta.file_id,
                    file_name: meta.file_name,
                    local_path: PathBuf::new(),
                    total_length: meta.length,
                    mime_type: meta.mime_type,
                    resume_offset: 0,
                    public: meta.public,
                    location,
                }),
                Err(e) => {
                    resolve_error.get_or_insert(TransferError::Api(e));
                }
            }
        }

        let mut batch = Arc::clone(&self.coordinator)
            .download_batch(descriptors, SinkMode::Memory, events_tx)
            .await;
        batch.first_error = resolve_error.or(batch.first_error);
        Ok(batch)
    }

    /// Continues a partial download whose bytes are verified contiguous.
    ///
    /// `partial` may be the in-progress `.part` file or a bare partial
    /// file from an earlier attempt (which is adopted as the part file).
    /// A still-valid `previous_location` is streamed against directly; an
    /// expired or absent one is re-resolved first.
    pub async fn resume_download(
        &self,
        partial: &Path,
        file: FileRef,
        previous_location: Option<ResolvedLocation>,
        events_tx: mpsc::Sender<TransferEvent>,
    ) -> Result<FileHandle, ClientError> {
        let dest = if partial.extension().is_some_and(|e| e == "part") {
            partial.with_extension("")
        } else {
            partial.to_path_buf()
        };
        if dest == *partial {
            fs::rename(partial, part_path_for(&dest))?;
        }
        let resume_offset = fs::metadata(part_path_for(&dest))?.len();

        let (file_id, file_name) = match &file {
            FileRef::Id(id) => (id.clone(), String::new()),
            FileRef::Name(name) => (String::new(), name.clone()),
        };

        // Prefer the durable checkpoint for declared length and mime type;
        // without one the resolution pass fills them in.
        let checkpoint = if file_id.is_empty() {
            None
        } else {
            TransferCheckpoint::load(self.store.as_ref(), &file_id, &dest)?
        };
        let descriptor = match checkpoint {
            Some(cp) => {
                let mut d = TransferDescriptor::from_checkpoint(cp);
                d.resume_offset = resume_offset.min(d.total_length);
                if previous_location.is_some() {
                    d.location = previous_location;
                }
                d
            }
            None => TransferDescriptor {
                file_id,
                file_name,
                local_path: dest,
                total_length: 0,
                mime_type: String::new(),
                resume_offset,
                public: false,
                location: previous_location,
            },
        };

        match self
            .coordinator
            .download(descriptor, SinkMode::Disk, events_tx)
            .await?
        {
            SessionEnd::Completed(file) => Ok(file),
            SessionEnd::Paused { offset } => Err(ClientError::Interrupted { offset }),
        }
    }

    /// Cancels the active transfer for `file_id`, if any. The transfer
    /// pauses with its progress intact.
    pub fn cancel_transfer(&self, file_id: &str) -> bool {
        self.coordinator
            .cancel(&TransferDescriptor::key_for_id(file_id))
    }

    /// Resumes a paused transfer for `file_id`.
    pub async fn resume_transfer(&self, file_id: &str) -> Result<SessionEnd, ClientError> {
        Ok(self
            .coordinator
            .resume(&TransferDescriptor::key_for_id(file_id))
            .await?)
    }

    // -----------------------------------------------------------------------
    // Metadata operations
    // -----------------------------------------------------------------------

    /// Resolves a streaming-capable location for a file. The location must
    /// be used before its expiry; after that it has to be re-resolved.
    pub async fn resolved_location(
        &self,
        file: FileRef,
    ) -> Result<(FileMetadata, ResolvedLocation), ClientError> {
        let response = self.resolve_ref(&file).await?;
        Ok((response.metadata, response.location))
    }

    /// Deletes a file remotely. Returns the number of records removed
    /// (zero or one).
    pub async fn delete_file(&self, file_id: &str) -> Result<u32, ClientError> {
        Ok(self.coordinator.delete(file_id).await?)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Resolves a selector into per-target metadata (and, where the
    /// control plane already handed one out, a location), preserving
    /// request order. Individual failures stay in their slot so batch
    /// aggregation can report them without masking the rest.
    #[allow(clippy::type_complexity)]
    async fn resolve_selector(
        &self,
        selector: &FileSelector,
    ) -> Result<Vec<Result<(FileMetadata, Option<ResolvedLocation>), ApiError>>, ClientError> {
        match selector {
            FileSelector::Ids(ids) => {
                let mut out = Vec::with_capacity(ids.len());
                for id in ids {
                    let item = self.resolve_ref(&FileRef::Id(id.clone())).await;
                    out.push(item.map(|r| (r.metadata, Some(r.location))));
                }
                Ok(out)
            }
            FileSelector::Names(names) => {
                let mut out = Vec::with_capacity(names.len());
                for name in names {
                    let item = self.resolve_ref(&FileRef::Name(name.clone())).await;
                    out.push(item.map(|r| (r.metadata, Some(r.location))));
                }
                Ok(out)
            }
            FileSelector::Query(query) => {
                let files = self.query_files(query).await?;
                Ok(files.into_iter().map(|meta| Ok((meta, None))).collect())
            }
        }
    }

    async fn resolve_ref(&self, file: &FileRef) -> Result<ResolveDownloadResponse, ApiError> {
        let payload = match file {
            FileRef::Id(id) => ResolveDownloadRequest::by_id(id),
            FileRef::Name(name) => ResolveDownloadRequest::by_name(name),
        };
        let request = ControlRequest::new(ControlOp::ResolveDownload, Some(&payload))
            .map_err(|e| ApiError::permanent(-1, format!("failed to encode request: {e}")))?;
        let response = self.control.call(request).await?;
        response
            .into_result::<ResolveDownloadResponse>()?
            .ok_or_else(|| ApiError::permanent(-1, "empty resolve response"))
    }

    async fn query_files(&self, query: &FileQuery) -> Result<Vec<FileMetadata>, ApiError> {
        let request = ControlRequest::new(
            ControlOp::QueryFiles,
            Some(&QueryFilesRequest {
                query: query.clone(),
            }),
        )
        .map_err(|e| ApiError::permanent(-1, format!("failed to encode request: {e}")))?;
        let response = self.control.call(request).await?;
        let parsed: QueryFilesResponse = response
            .into_result()?
            .ok_or_else(|| ApiError::permanent(-1, "empty query response"))?;
        Ok(parsed.files)
    }
}

/// `true` when the server copy should be downloaded over the local file.
/// A missing local file or unknown server timestamp always downloads.
fn server_is_newer(meta: &FileMetadata, dest: &Path) -> bool {
    let Some(updated_at) = meta.updated_at else {
        return true;
    };
    let Ok(modified) = fs::metadata(dest).and_then(|m| m.modified()) else {
        return true;
    };
    updated_at > DateTime::<Utc>::from(modified)
}
