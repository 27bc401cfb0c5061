//! Local scratch storage for transcoder input and output.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Errors that can occur during scratch file handling.
#[derive(Debug, Error)]
pub enum ScratchError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScratchError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Byte-oriented scratch storage.
///
/// Implementations do not guard against concurrent writers to the same path;
/// callers derive paths that cannot collide.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait ScratchStorage: Send + Sync {
    /// Directory holding staged uploads.
    fn source_dir(&self) -> PathBuf;

    /// Directory holding stream index and chunk output.
    fn stream_dir(&self) -> PathBuf;

    /// Directory holding canonical WAV output.
    fn wav_dir(&self) -> PathBuf;

    /// Write `data` to `path`, creating parent directories as needed.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<(), ScratchError>;

    /// Read the whole file at `path`.
    async fn read(&self, path: &Path) -> Result<Vec<u8>, ScratchError>;

    /// Remove every path, continuing past failures.
    ///
    /// Returns the failures; a missing file is not a failure.
    async fn remove(&self, paths: &[PathBuf]) -> Vec<ScratchError>;

    /// Files directly under `dir` whose name starts with `prefix`.
    ///
    /// A missing directory has no entries.
    async fn list_with_prefix(
        &self,
        dir: &Path,
        prefix: &str,
    ) -> Result<Vec<PathBuf>, ScratchError>;
}

/// Scratch storage on the local filesystem.
///
/// Layout under the root:
/// - `source/` original uploads, `<sum><ext>`
/// - `stream/` chunked stream output, `<sum>.m3u8` and `<sum>NNN.ts`
/// - `wav/` canonical WAV output, `<sum>.wav`
pub struct LocalScratch {
    root: PathBuf,
}

impl LocalScratch {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the scratch root and its sub-directories.
    pub async fn init(&self) -> Result<(), ScratchError> {
        for dir in [self.source_dir(), self.stream_dir(), self.wav_dir()] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| ScratchError::io(&dir, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ScratchStorage for LocalScratch {
    fn source_dir(&self) -> PathBuf {
        self.root.join("source")
    }

    fn stream_dir(&self) -> PathBuf {
        self.root.join("stream")
    }

    fn wav_dir(&self) -> PathBuf {
        self.root.join("wav")
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<(), ScratchError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ScratchError::io(parent, e))?;
        }

        let mut file = fs::File::create(path)
            .await
            .map_err(|e| ScratchError::io(path, e))?;
        file.write_all(data)
            .await
            .map_err(|e| ScratchError::io(path, e))?;
        file.flush().await.map_err(|e| ScratchError::io(path, e))?;

        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>, ScratchError> {
        fs::read(path).await.map_err(|e| ScratchError::io(path, e))
    }

    async fn remove(&self, paths: &[PathBuf]) -> Vec<ScratchError> {
        let mut failures = Vec::new();
        for path in paths {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => failures.push(ScratchError::io(path, e)),
            }
        }
        failures
    }

    async fn list_with_prefix(
        &self,
        dir: &Path,
        prefix: &str,
    ) -> Result<Vec<PathBuf>, ScratchError> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ScratchError::io(dir, e)),
        };

        let mut matches = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ScratchError::io(dir, e))?
        {
            if entry.file_name().to_string_lossy().starts_with(prefix) {
                matches.push(entry.path());
            }
        }
        matches.sort();
        Ok(matches)
    }
}
