use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub scratch_dir: Option<String>,
    pub max_upload_bytes: Option<u64>,
    pub accepted_mimetypes: Option<Vec<String>>,
    pub request_timeout_secs: Option<u64>,

    // Feature configs
    pub transcoder: Option<TranscoderConfig>,
    pub blob_store: Option<BlobStoreConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TranscoderConfig {
    pub binary_path: Option<String>,
    pub codec: Option<String>,
    pub bitrate_kbps: Option<u32>,
    pub chunk_seconds: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BlobStoreConfig {
    /// Backend to use: "fs" or "http"
    pub backend: Option<String>,
    /// Root directory for the "fs" backend.
    pub root: Option<String>,
    /// Endpoint for the "http" backend, e.g. "http://minio:9000".
    pub base_url: Option<String>,
    pub bucket: Option<String>,
    pub token: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
