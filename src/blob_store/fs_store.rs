//! Blob store backed by a local (or mounted) directory.

use super::{check_length, validate_key, BlobObject, BlobStore, PutRequest, StorageError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Sidecar stored next to each object.
#[derive(Debug, Serialize, Deserialize)]
struct ObjectMeta {
    content_type: String,
    content_length: u64,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

/// Directory-backed store.
///
/// Object bytes live under `<root>/objects/<key>`, metadata under
/// `<root>/meta/<key>.json`. Both are written to a temp file and renamed into
/// place, so readers never observe a partial object.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join("objects").join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join("meta").join(format!("{}.json", key))
    }
}

/// Write `data` to `path` atomically.
fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, req: PutRequest) -> Result<(), StorageError> {
        validate_key(&req.key)?;
        check_length(&req)?;

        let object_path = self.object_path(&req.key);
        let meta_path = self.meta_path(&req.key);
        let meta = ObjectMeta {
            content_type: req.content_type,
            content_length: req.content_length,
            metadata: req.metadata,
        };
        let meta_json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
        let body = req.body;

        tokio::task::spawn_blocking(move || {
            write_atomic(&object_path, &body)?;
            write_atomic(&meta_path, &meta_json)
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e)))??;

        debug!("Stored object {}", req.key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<BlobObject, StorageError> {
        validate_key(key)?;

        let data = match tokio::fs::read(self.object_path(key)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let meta = match tokio::fs::read(self.meta_path(key)).await {
            Ok(raw) => serde_json::from_slice::<ObjectMeta>(&raw).ok(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let (content_type, metadata) = match meta {
            Some(meta) => (meta.content_type, meta.metadata),
            None => (DEFAULT_CONTENT_TYPE.to_string(), BTreeMap::new()),
        };

        Ok(BlobObject {
            data,
            content_type,
            metadata,
        })
    }
}
