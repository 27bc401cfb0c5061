//! Upload pipeline: verify, transcode, publish, summarize, clean up.

use super::metrics::IngestionMetrics;
use super::scratch::{ScratchError, ScratchStorage};
use super::transcoder::{EncodeRequest, TranscodeError, Transcoder};
use super::waveform::{DecodeError, WaveformGenerator};
use crate::blob_store::{BlobObject, BlobStore, PutRequest, StorageError};
use crate::mimes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const STREAM_PREFIX: &str = "stream";
const DOWNLOAD_PREFIX: &str = "download";
const STREAM_INDEX_CONTENT_TYPE: &str = "application/x-mpegURL";
const STREAM_CHUNK_CONTENT_TYPE: &str = "video/MP2T";
const WAV_EXTENSION: &str = ".wav";

/// Errors that can occur during ingestion.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("Integrity check failed: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("Unsupported format: {0:?}")]
    UnsupportedFormat(String),

    #[error("Upload too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("Transcode error: {0}")]
    Transcode(#[source] TranscodeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Scratch error: {0}")]
    Scratch(#[from] ScratchError),

    #[error("Ingestion cancelled")]
    Cancelled,

    #[error("Ingestion task failed: {0}")]
    TaskFailed(String),
}

impl From<TranscodeError> for IngestionError {
    fn from(e: TranscodeError) -> Self {
        match e {
            TranscodeError::Cancelled => IngestionError::Cancelled,
            other => IngestionError::Transcode(other),
        }
    }
}

impl IngestionError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestionError::Integrity { .. } => "integrity",
            IngestionError::UnsupportedFormat(_) => "unsupported_format",
            IngestionError::TooLarge { .. } => "too_large",
            IngestionError::Transcode(_) => "transcode",
            IngestionError::Storage(_) => "storage",
            IngestionError::Decode(_) => "decode",
            IngestionError::Scratch(_) => "scratch",
            IngestionError::Cancelled => "cancelled",
            IngestionError::TaskFailed(_) => "task_failed",
        }
    }

    /// Whether repeating the same request could succeed.
    ///
    /// Input problems are never retryable. Transport, I/O and cancellation
    /// are.
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestionError::Integrity { .. }
            | IngestionError::UnsupportedFormat(_)
            | IngestionError::TooLarge { .. }
            | IngestionError::Decode(_)
            | IngestionError::TaskFailed(_) => false,
            IngestionError::Transcode(e) => matches!(
                e,
                TranscodeError::Spawn { .. } | TranscodeError::Io(_)
            ),
            IngestionError::Storage(e) => {
                matches!(e, StorageError::Io(_) | StorageError::Transport(_))
            }
            IngestionError::Scratch(_) | IngestionError::Cancelled => true,
        }
    }
}

/// Limits applied to every request.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub max_upload_bytes: u64,
    /// Empty means every supported mimetype is accepted.
    pub accepted_mimetypes: Vec<String>,
    /// Deadline for the whole pipeline, after which it is cancelled.
    pub request_timeout: Option<Duration>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 2 * 1024 * 1024,
            accepted_mimetypes: Vec::new(),
            request_timeout: None,
        }
    }
}

/// A user upload.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub data: Vec<u8>,
    /// Claimed mimetype, canonical or an alias.
    pub mimetype: String,
    pub owner: String,
    /// Hex SHA-256 of `data` as computed by the client.
    pub sum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestResult {
    /// Content address of the source, also the stem of every artifact key.
    pub artifact_id: String,
    pub waveform: Vec<i32>,
    /// SHA-256 of the canonical WAV.
    pub download_hash: String,
}

/// Lowercase hex SHA-256 of `data`.
pub fn content_sum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

type SumLocks = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Coordinates scratch storage, transcoding, blob uploads and waveform
/// generation for each upload.
pub struct IngestionService {
    config: IngestionConfig,
    pipeline: Arc<Pipeline>,
    metrics: IngestionMetrics,
    sum_locks: SumLocks,
}

/// Collaborators of a run. Shared with the spawned task that performs it.
struct Pipeline {
    scratch: Arc<dyn ScratchStorage>,
    transcoder: Arc<dyn Transcoder>,
    blob_store: Arc<dyn BlobStore>,
    waveform: Arc<dyn WaveformGenerator>,
}

impl IngestionService {
    pub fn new(
        config: IngestionConfig,
        scratch: Arc<dyn ScratchStorage>,
        transcoder: Arc<dyn Transcoder>,
        blob_store: Arc<dyn BlobStore>,
        waveform: Arc<dyn WaveformGenerator>,
    ) -> Result<Self, prometheus::Error> {
        Ok(Self {
            config,
            pipeline: Arc::new(Pipeline {
                scratch,
                transcoder,
                blob_store,
                waveform,
            }),
            metrics: IngestionMetrics::new()?,
            sum_locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    pub fn metrics(&self) -> &IngestionMetrics {
        &self.metrics
    }

    /// Scratch path of the source upload: `source/<sum><ext>`.
    pub fn local_filename(&self, sum: &str, mimetype: &str) -> PathBuf {
        self.pipeline.local_filename(sum, mimetype)
    }

    /// Scratch stem of the stream output: `stream/<sum>`.
    pub fn stream_filename(&self, sum: &str) -> PathBuf {
        self.pipeline.stream_filename(sum)
    }

    /// Scratch path of the canonical WAV: `wav/<sum>.wav`.
    pub fn wav_filename(&self, sum: &str) -> PathBuf {
        self.pipeline.wav_filename(sum)
    }

    /// Run the whole pipeline for one upload.
    ///
    /// Dropping the returned future cancels the run. The run still waits for
    /// its encodes and removes its scratch files before the next request for
    /// the same sum can start.
    pub async fn ingest(
        &self,
        req: IngestRequest,
        cancel: CancellationToken,
    ) -> Result<IngestResult, IngestionError> {
        let started = Instant::now();
        self.metrics.record_started();
        let size = req.data.len();

        let token = cancel.child_token();
        let _cancel_on_drop = token.clone().drop_guard();
        let timer = self.config.request_timeout.map(|timeout| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!("Ingestion timed out after {:?}", timeout);
                token.cancel();
            })
        });

        let result = self.run_pipeline(req, &token).await;

        if let Some(timer) = timer {
            timer.abort();
        }

        match &result {
            Ok(ingested) => {
                info!(
                    "Ingested {} in {:?}",
                    ingested.artifact_id,
                    started.elapsed()
                );
                self.metrics.record_succeeded(size, started.elapsed());
            }
            Err(e) => {
                error!("Ingestion failed: {}", e);
                self.metrics.record_failed(e.kind(), started.elapsed());
            }
        }

        result
    }

    /// Read a canonical WAV back from the blob store.
    ///
    /// `.wav` is appended when the filename has no extension.
    pub async fn fetch_download(&self, filename: &str) -> Result<BlobObject, IngestionError> {
        if filename.contains('/') {
            return Err(StorageError::InvalidKey(filename.to_string()).into());
        }

        let key = if filename.ends_with(WAV_EXTENSION) {
            format!("{}/{}", DOWNLOAD_PREFIX, filename)
        } else {
            format!("{}/{}{}", DOWNLOAD_PREFIX, filename, WAV_EXTENSION)
        };

        let object = self.pipeline.blob_store.get(&key).await?;
        self.metrics.record_download();
        Ok(object)
    }

    async fn run_pipeline(
        &self,
        req: IngestRequest,
        cancel: &CancellationToken,
    ) -> Result<IngestResult, IngestionError> {
        let sum = self.validate(&req)?;
        let mimetype = mimes::canonical(&req.mimetype);

        info!(
            "Ingesting {} ({} bytes, {}) for {}",
            sum,
            req.data.len(),
            mimetype,
            req.owner
        );

        let sum_lock = until_cancelled(cancel, async {
            Ok::<_, IngestionError>(self.lock_sum(&sum).await)
        })
        .await?;

        // The task owns the lock, so it is released only after cleanup, even
        // when this future is dropped first.
        let pipeline = self.pipeline.clone();
        let cancel = cancel.clone();
        let data = req.data;
        let run = tokio::spawn(async move {
            let source_path = pipeline.local_filename(&sum, mimetype);
            let result = pipeline
                .transcode_and_publish(&sum, mimetype, &source_path, data, &cancel)
                .await;

            pipeline.cleanup(&sum, &source_path).await;
            drop(sum_lock);
            result
        });

        flatten_join(run.await)
    }

    /// Check the request before any work is done. Returns the content sum.
    fn validate(&self, req: &IngestRequest) -> Result<String, IngestionError> {
        let actual = content_sum(&req.data);
        if !req.sum.eq_ignore_ascii_case(&actual) {
            return Err(IngestionError::Integrity {
                expected: req.sum.clone(),
                actual,
            });
        }

        let mimetype = mimes::canonical(&req.mimetype);
        let accepted = self.config.accepted_mimetypes.is_empty()
            || self
                .config
                .accepted_mimetypes
                .iter()
                .any(|m| mimes::canonical(m) == mimetype);
        if mimetype.is_empty() || !accepted {
            return Err(IngestionError::UnsupportedFormat(req.mimetype.clone()));
        }

        let size = req.data.len() as u64;
        if size > self.config.max_upload_bytes {
            return Err(IngestionError::TooLarge {
                size,
                max: self.config.max_upload_bytes,
            });
        }

        Ok(actual)
    }

    /// Serialize requests for the same sum.
    async fn lock_sum(&self, sum: &str) -> SumLock {
        let lock = {
            let mut locks = self
                .sum_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Entries referenced only by the map belong to waiters that gave up.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(sum.to_string()).or_default().clone()
        };

        SumLock {
            locks: self.sum_locks.clone(),
            sum: sum.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }
}

impl Pipeline {
    fn local_filename(&self, sum: &str, mimetype: &str) -> PathBuf {
        self.scratch
            .source_dir()
            .join(format!("{}{}", sum, mimes::file_extension(mimetype)))
    }

    fn stream_filename(&self, sum: &str) -> PathBuf {
        self.scratch.stream_dir().join(sum)
    }

    fn wav_filename(&self, sum: &str) -> PathBuf {
        self.scratch
            .wav_dir()
            .join(format!("{}{}", sum, WAV_EXTENSION))
    }

    async fn transcode_and_publish(
        &self,
        sum: &str,
        mimetype: &str,
        source_path: &Path,
        data: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<IngestResult, IngestionError> {
        until_cancelled(cancel, async {
            self.scratch.write(source_path, &data).await?;
            Ok::<_, IngestionError>(())
        })
        .await?;
        drop(data);

        let stream_req = EncodeRequest {
            mimetype: mimetype.to_string(),
            input_path: source_path.to_path_buf(),
            output_path: self.stream_filename(sum),
        };
        let wav_req = EncodeRequest {
            mimetype: mimetype.to_string(),
            input_path: source_path.to_path_buf(),
            output_path: self.wav_filename(sum),
        };

        let stream_task = tokio::spawn(publish_stream(
            self.transcoder.clone(),
            self.scratch.clone(),
            self.blob_store.clone(),
            stream_req,
            cancel.clone(),
        ));
        let wav_task = tokio::spawn(publish_wav(
            self.transcoder.clone(),
            self.scratch.clone(),
            self.blob_store.clone(),
            sum.to_string(),
            wav_req,
            cancel.clone(),
        ));

        // Both tasks are always awaited so neither outlives the request.
        let stream_result = flatten_join(stream_task.await);
        let wav_result = flatten_join(wav_task.await);

        if let Err(e) = &stream_result {
            error!("Stream task for {} failed: {}", sum, e);
        }
        if let Err(e) = &wav_result {
            error!("WAV task for {} failed: {}", sum, e);
        }
        let chunks = stream_result?;
        let (wav_path, download_hash) = wav_result?;
        debug!("Published {} stream chunks for {}", chunks, sum);

        if cancel.is_cancelled() {
            return Err(IngestionError::Cancelled);
        }
        let waveform = self.waveform.waveform(&wav_path).await?;

        Ok(IngestResult {
            artifact_id: sum.to_string(),
            waveform,
            download_hash,
        })
    }

    /// Best-effort removal of every scratch file derived from `sum`.
    async fn cleanup(&self, sum: &str, source_path: &Path) {
        let wav_path = self.wav_filename(sum);
        let mut paths = vec![
            source_path.to_path_buf(),
            with_part_suffix(&wav_path),
            wav_path,
        ];

        match self
            .scratch
            .list_with_prefix(&self.scratch.stream_dir(), sum)
            .await
        {
            Ok(staged) => paths.extend(staged),
            Err(e) => warn!("Failed to list stream scratch files for {}: {}", sum, e),
        }

        for failure in self.scratch.remove(&paths).await {
            warn!("Failed to clean up scratch file: {}", failure);
        }
    }
}

/// Held for the duration of one pipeline run. The map entry is removed when
/// the last holder lets go.
struct SumLock {
    locks: SumLocks,
    sum: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SumLock {
    fn drop(&mut self) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(guard) = self.guard.take() {
            // The map and this guard are the only references left.
            if Arc::strong_count(OwnedMutexGuard::mutex(&guard)) == 2 {
                locks.remove(&self.sum);
            }
        }
    }
}

/// Encode the stream output and upload the index plus every chunk.
///
/// Returns the number of chunks.
async fn publish_stream(
    transcoder: Arc<dyn Transcoder>,
    scratch: Arc<dyn ScratchStorage>,
    blob_store: Arc<dyn BlobStore>,
    req: EncodeRequest,
    cancel: CancellationToken,
) -> Result<usize, IngestionError> {
    let output = transcoder.stream(&req, &cancel).await?;
    let chunks = output.segment_paths.len();

    let mut uploads = JoinSet::new();
    let files = std::iter::once((output.index_path, STREAM_INDEX_CONTENT_TYPE)).chain(
        output
            .segment_paths
            .into_iter()
            .map(|path| (path, STREAM_CHUNK_CONTENT_TYPE)),
    );
    for (path, content_type) in files {
        let scratch = scratch.clone();
        let blob_store = blob_store.clone();
        uploads.spawn(async move {
            let data = scratch.read(&path).await?;
            let key = format!("{}/{}", STREAM_PREFIX, file_name(&path)?);
            blob_store
                .put(PutRequest::new(key, data, content_type))
                .await?;
            Ok::<_, IngestionError>(())
        });
    }

    let mut first_error = None;
    loop {
        // Returning drops the set, which aborts the uploads still running.
        let joined = tokio::select! {
            joined = uploads.join_next() => joined,
            _ = cancel.cancelled() => return Err(IngestionError::Cancelled),
        };
        match joined {
            None => break,
            Some(Ok(Ok(()))) => {}
            Some(Ok(Err(e))) => {
                error!("Stream upload for {:?} failed: {}", req.output_path, e);
                first_error.get_or_insert(e);
            }
            Some(Err(e)) => {
                first_error.get_or_insert(IngestionError::TaskFailed(e.to_string()));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(chunks),
    }
}

/// Encode the canonical WAV and upload it under `download/<sum>.wav`.
///
/// Returns the scratch path and the SHA-256 of the WAV bytes.
async fn publish_wav(
    transcoder: Arc<dyn Transcoder>,
    scratch: Arc<dyn ScratchStorage>,
    blob_store: Arc<dyn BlobStore>,
    sum: String,
    req: EncodeRequest,
    cancel: CancellationToken,
) -> Result<(PathBuf, String), IngestionError> {
    let output = transcoder.wav(&req, &cancel).await?;
    let data = scratch.read(&output.path).await?;
    let download_hash = content_sum(&data);

    let key = format!("{}/{}{}", DOWNLOAD_PREFIX, sum, WAV_EXTENSION);
    until_cancelled(&cancel, async {
        blob_store
            .put(PutRequest::new(key, data, mimes::AUDIO_WAV))
            .await?;
        Ok::<_, IngestionError>(())
    })
    .await?;

    Ok((output.path, download_hash))
}

async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, IngestionError>>,
) -> Result<T, IngestionError> {
    tokio::select! {
        result = fut => result,
        _ = cancel.cancelled() => Err(IngestionError::Cancelled),
    }
}

fn flatten_join<T>(
    joined: Result<Result<T, IngestionError>, JoinError>,
) -> Result<T, IngestionError> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(IngestionError::Cancelled),
        Err(e) => Err(IngestionError::TaskFailed(e.to_string())),
    }
}

fn file_name(path: &Path) -> Result<&str, StorageError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| StorageError::InvalidKey(format!("{:?}", path)))
}

fn with_part_suffix(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".part");
    PathBuf::from(s)
}
