mod file;
mod http;
mod transport;

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub use file::*;
pub use http::*;
pub use transport::*;

const PROGRESS_CHANNEL_CAPACITY: usize = 64;
/// Upper bound for preallocating a body from its content-length header.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("A download of '{0}' is already in progress")]
    AlreadyInProgress(AssetId),
    #[error("Error downloading '{file_name}': {source}")]
    Transport {
        file_name: String,
        #[source]
        source: TransportError,
    },
    #[error("Download canceled")]
    Cancelled,
}

/// One entry of the download registry, as shown in a progress list.
#[derive(Clone, Debug)]
pub struct DownloadTask {
    pub asset_id: AssetId,
    pub file_name: String,
    pub total_bytes: Option<u64>,
    pub received_bytes: u64,
    /// Only meaningful when `total_bytes` is known. Never decreases.
    pub progress_percent: u8,
    pub cancellation_token: CancellationToken,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub asset_id: AssetId,
    pub file_name: String,
    pub progress_percent: u8,
    pub received_bytes: u64,
    pub total_bytes: u64,
}

/// Proof of a successful [`DownloadManager::begin`]. Carries the transfer's cancellation token.
#[derive(Clone, Debug)]
pub struct DownloadHandle {
    asset_id: AssetId,
    file_name: String,
    generation: u64,
    cancellation_token: CancellationToken,
}

impl DownloadHandle {
    pub fn asset_id(&self) -> &AssetId {
        &self.asset_id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }
}

/// A completely received body.
#[derive(Clone, Debug)]
pub struct DownloadedBlob {
    pub file_name: String,
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

struct TaskEntry {
    task: DownloadTask,
    /// Distinguishes two downloads of the same asset, so that a delayed removal
    /// never removes a newer task.
    generation: u64,
    completed: bool,
}

#[derive(Default)]
struct Registry {
    tasks: HashMap<AssetId, TaskEntry>,
    next_generation: u64,
}

struct Inner {
    registry: Mutex<Registry>,
    progress_sender: broadcast::Sender<ProgressUpdate>,
    completion_grace: Duration,
}

/// Process-wide registry of in-flight downloads. Cheap to clone.
///
/// At most one download per asset id can be active. Finished downloads stay
/// listed at 100% for `completion_grace` before they disappear.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

impl DownloadManager {
    pub fn new(completion_grace: Duration) -> Self {
        let (progress_sender, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                progress_sender,
                completion_grace,
            }),
        }
    }

    /// Registers a new download. Fails if the asset is already being downloaded.
    pub fn begin(
        &self,
        asset_id: impl Into<AssetId>,
        file_name: impl Into<String>,
    ) -> Result<DownloadHandle, DownloadError> {
        let asset_id = asset_id.into();
        let file_name = file_name.into();
        let mut registry = self.inner.registry.lock();

        if registry.tasks.contains_key(&asset_id) {
            return Err(DownloadError::AlreadyInProgress(asset_id));
        }

        let generation = registry.next_generation;
        registry.next_generation += 1;
        let cancellation_token = CancellationToken::new();

        registry.tasks.insert(
            asset_id.clone(),
            TaskEntry {
                task: DownloadTask {
                    asset_id: asset_id.clone(),
                    file_name: file_name.clone(),
                    total_bytes: None,
                    received_bytes: 0,
                    progress_percent: 0,
                    cancellation_token: cancellation_token.clone(),
                },
                generation,
                completed: false,
            },
        );
        log::info!("Downloading {file_name} ({asset_id})");

        Ok(DownloadHandle {
            asset_id,
            file_name,
            generation,
            cancellation_token,
        })
    }

    /// Reads the whole body of `url`, updating the task's progress after every chunk.
    ///
    /// On failure or cancellation the task is removed right away. On success it
    /// stays at 100% until the grace period is over.
    pub async fn stream_and_report(
        &self,
        handle: &DownloadHandle,
        transport: &dyn Transport,
        url: &str,
    ) -> Result<DownloadedBlob, DownloadError> {
        let result = self.read_body(handle, transport, url).await;
        match &result {
            Ok(_) => self.complete(handle),
            Err(error) => {
                if !matches!(error, DownloadError::Cancelled) {
                    log::warn!("{error}");
                }
                handle.cancellation_token.cancel();
                self.remove(&handle.asset_id, Some(handle.generation));
            }
        }
        result
    }

    async fn read_body(
        &self,
        handle: &DownloadHandle,
        transport: &dyn Transport,
        url: &str,
    ) -> Result<DownloadedBlob, DownloadError> {
        let token = handle.cancellation_token.clone();
        let transport_error = |source| DownloadError::Transport {
            file_name: handle.file_name.clone(),
            source,
        };

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            response = transport.fetch_stream(url, token.clone()) => response.map_err(transport_error)?,
        };

        let total_bytes = response.content_length.filter(|&length| length > 0);
        self.set_total(handle, total_bytes);

        let mut body = response.body;
        let mut buffer =
            BytesMut::with_capacity(total_bytes.unwrap_or(0).min(MAX_PREALLOCATION) as usize);

        loop {
            let chunk = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(DownloadError::Cancelled),
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk.map_err(transport_error)?;
            buffer.extend_from_slice(&chunk);

            if !self.record_chunk(handle, chunk.len() as u64) {
                // Removed from the registry behind our back.
                return Err(DownloadError::Cancelled);
            }
        }

        Ok(DownloadedBlob {
            file_name: handle.file_name.clone(),
            bytes: buffer.freeze(),
            content_type: response.content_type,
        })
    }

    fn set_total(&self, handle: &DownloadHandle, total_bytes: Option<u64>) {
        let mut registry = self.inner.registry.lock();
        if let Some(entry) = registry.tasks.get_mut(&handle.asset_id) {
            if entry.generation == handle.generation {
                entry.task.total_bytes = total_bytes;
            }
        }
    }

    /// Returns false if the task no longer exists.
    fn record_chunk(&self, handle: &DownloadHandle, length: u64) -> bool {
        let update = {
            let mut registry = self.inner.registry.lock();
            let Some(entry) = registry
                .tasks
                .get_mut(&handle.asset_id)
                .filter(|entry| entry.generation == handle.generation)
            else {
                return false;
            };

            let task = &mut entry.task;
            task.received_bytes += length;
            let Some(total_bytes) = task.total_bytes else {
                return true;
            };

            let percent = progress_percent(task.received_bytes, total_bytes);
            if percent <= task.progress_percent {
                return true;
            }
            task.progress_percent = percent;
            log::debug!("{}: {percent}%", task.file_name);
            ProgressUpdate {
                asset_id: task.asset_id.clone(),
                file_name: task.file_name.clone(),
                progress_percent: percent,
                received_bytes: task.received_bytes,
                total_bytes,
            }
        };

        // Nobody listening is fine.
        let _ = self.inner.progress_sender.send(update);
        true
    }

    fn complete(&self, handle: &DownloadHandle) {
        let reached_full_progress = {
            let mut registry = self.inner.registry.lock();
            match registry
                .tasks
                .get_mut(&handle.asset_id)
                .filter(|entry| entry.generation == handle.generation)
            {
                Some(entry) => {
                    entry.completed = true;
                    entry.task.progress_percent == 100
                }
                None => return,
            }
        };
        log::info!("Downloaded {}", handle.file_name);

        if !reached_full_progress {
            // Unknown or wrong content length, there is no 100% to show.
            self.remove(&handle.asset_id, Some(handle.generation));
            return;
        }

        let manager = self.clone();
        let asset_id = handle.asset_id.clone();
        let generation = handle.generation;
        tokio::spawn(async move {
            tokio::time::sleep(manager.inner.completion_grace).await;
            manager.remove(&asset_id, Some(generation));
        });
    }

    /// Removes the task. An unfinished transfer is canceled first.
    pub fn end(&self, asset_id: &AssetId) {
        self.remove(asset_id, None);
    }

    /// Aborts the transfer and forgets the task. Calling it again is a no-op.
    pub fn cancel(&self, asset_id: &AssetId) {
        let mut registry = self.inner.registry.lock();
        if let Some(entry) = registry.tasks.remove(asset_id) {
            entry.task.cancellation_token.cancel();
        }
    }

    fn remove(&self, asset_id: &AssetId, generation: Option<u64>) {
        let mut registry = self.inner.registry.lock();
        let matches = registry
            .tasks
            .get(asset_id)
            .is_some_and(|entry| generation.map_or(true, |g| g == entry.generation));
        if !matches {
            return;
        }

        if let Some(entry) = registry.tasks.remove(asset_id) {
            let token = &entry.task.cancellation_token;
            if !entry.completed && !token.is_cancelled() {
                token.cancel();
            }
        }
    }

    pub fn is_downloading(&self, asset_id: &AssetId) -> bool {
        self.inner.registry.lock().tasks.contains_key(asset_id)
    }

    /// Snapshot of all listed downloads, ordered by asset id.
    pub fn tasks(&self) -> Vec<DownloadTask> {
        let registry = self.inner.registry.lock();
        let mut tasks: Vec<_> = registry.tasks.values().map(|entry| entry.task.clone()).collect();
        tasks.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));
        tasks
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.inner.progress_sender.subscribe()
    }
}

/// Rounded percentage that only reaches 100 once every byte has arrived.
fn progress_percent(received_bytes: u64, total_bytes: u64) -> u8 {
    if received_bytes >= total_bytes {
        return 100;
    }
    let percent = (received_bytes as f64 / total_bytes as f64 * 100.0).round();
    (percent as u8).min(99)
}
