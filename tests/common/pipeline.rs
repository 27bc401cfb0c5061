//! Test pipeline wiring
//!
//! Each pipeline owns its own temp directory holding the scratch root and,
//! unless another store is supplied, a filesystem blob store.

use super::spies::{SpyTranscoder, SpyWaveform};
use sample_store::blob_store::{BlobStore, FsBlobStore};
use sample_store::ingestion::{IngestionConfig, IngestionService, LocalScratch};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestPipeline {
    pub service: IngestionService,
    pub transcoder: Arc<SpyTranscoder>,
    pub waveform: Arc<SpyWaveform>,
    pub blob_store: Arc<dyn BlobStore>,
    pub scratch_root: PathBuf,

    // Keep the temp directory alive until drop
    _temp_dir: TempDir,
}

impl TestPipeline {
    pub async fn new(transcoder: SpyTranscoder) -> Self {
        Self::with_config(transcoder, IngestionConfig::default()).await
    }

    pub async fn with_config(transcoder: SpyTranscoder, config: IngestionConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let blob_store = Arc::new(FsBlobStore::new(temp_dir.path().join("blobs")));
        Self::build(temp_dir, transcoder, config, blob_store).await
    }

    pub async fn with_blob_store(transcoder: SpyTranscoder, blob_store: Arc<dyn BlobStore>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        Self::build(temp_dir, transcoder, IngestionConfig::default(), blob_store).await
    }

    async fn build(
        temp_dir: TempDir,
        transcoder: SpyTranscoder,
        config: IngestionConfig,
        blob_store: Arc<dyn BlobStore>,
    ) -> Self {
        let scratch_root = temp_dir.path().join("scratch");
        let scratch = Arc::new(LocalScratch::new(&scratch_root));
        scratch.init().await.expect("Failed to init scratch");

        let transcoder = Arc::new(transcoder);
        let waveform = Arc::new(SpyWaveform::new());

        let service = IngestionService::new(
            config,
            scratch,
            transcoder.clone(),
            blob_store.clone(),
            waveform.clone(),
        )
        .expect("Failed to create ingestion service");

        Self {
            service,
            transcoder,
            waveform,
            blob_store,
            scratch_root,
            _temp_dir: temp_dir,
        }
    }

    /// Every regular file left under the scratch root.
    pub fn scratch_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        collect_files(&self.scratch_root, &mut files);
        files.sort();
        files
    }
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, files);
        } else {
            files.push(path);
        }
    }
}
