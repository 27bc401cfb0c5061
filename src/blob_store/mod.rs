//! Durable, content-addressed object storage for ingestion artifacts.
//!
//! Keys are slash-separated relative paths such as `stream/<sum>.m3u8` or
//! `download/<sum>.wav`. Writing the same key twice overwrites it, so a
//! repeated put of identical bytes is a no-op in effect.

mod fs_store;
mod http_store;

pub use fs_store::FsBlobStore;
pub use http_store::HttpBlobStore;

use crate::config::BlobStoreSettings;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by blob store backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Declared length {declared} does not match body length {actual}")]
    LengthMismatch { declared: u64, actual: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// A single object upload.
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub key: String,
    pub body: Vec<u8>,
    pub content_length: u64,
    pub content_type: String,
    pub metadata: BTreeMap<String, String>,
}

impl PutRequest {
    /// Build a request whose `filename` metadata is the last key segment.
    pub fn new(key: impl Into<String>, body: Vec<u8>, content_type: impl Into<String>) -> Self {
        let key = key.into();
        let filename = key.rsplit('/').next().unwrap_or(&key).to_string();
        let mut metadata = BTreeMap::new();
        metadata.insert("filename".to_string(), filename);

        Self {
            content_length: body.len() as u64,
            key,
            body,
            content_type: content_type.into(),
            metadata,
        }
    }
}

/// An object read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobObject {
    pub data: Vec<u8>,
    pub content_type: String,
    pub metadata: BTreeMap<String, String>,
}

#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store an object, replacing any previous value under the same key.
    async fn put(&self, req: PutRequest) -> Result<(), StorageError>;

    /// Fetch an object. A missing key yields [`StorageError::NotFound`].
    async fn get(&self, key: &str) -> Result<BlobObject, StorageError>;
}

/// Build the configured backend.
pub fn from_settings(settings: &BlobStoreSettings) -> Result<Arc<dyn BlobStore>, StorageError> {
    match settings {
        BlobStoreSettings::Fs { root } => Ok(Arc::new(FsBlobStore::new(root))),
        BlobStoreSettings::Http {
            base_url,
            bucket,
            token,
            timeout_secs,
        } => Ok(Arc::new(HttpBlobStore::new(
            base_url,
            bucket,
            token.clone(),
            *timeout_secs,
        )?)),
    }
}

/// Reject keys that could escape the store namespace.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key.split('/').any(|c| c.is_empty() || c == "." || c == "..");

    if invalid {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

pub(crate) fn check_length(req: &PutRequest) -> Result<(), StorageError> {
    let actual = req.body.len() as u64;
    if req.content_length != actual {
        return Err(StorageError::LengthMismatch {
            declared: req.content_length,
            actual,
        });
    }
    Ok(())
}
