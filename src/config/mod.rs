mod file_config;

pub use file_config::{BlobStoreConfig, FileConfig, TranscoderConfig};

use crate::ingestion::IngestionConfig;
use crate::mimes;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 2 * 1024 * 1024;
const DEFAULT_FFMPEG: &str = "ffmpeg";
const DEFAULT_CODEC: &str = "libmp3lame";
const DEFAULT_BITRATE_KBPS: u32 = 128;
const DEFAULT_CHUNK_SECONDS: u32 = 10;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub scratch_dir: Option<PathBuf>,
    pub max_upload_bytes: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub ffmpeg: Option<PathBuf>,
    pub blob_root: Option<PathBuf>,
    pub blob_url: Option<String>,
    pub bucket: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub scratch_dir: PathBuf,
    pub max_upload_bytes: u64,
    /// Empty means every supported mimetype is accepted.
    pub accepted_mimetypes: Vec<String>,
    pub request_timeout: Option<Duration>,

    // Feature configs (with defaults)
    pub transcoder: TranscoderSettings,
    pub blob_store: BlobStoreSettings,
}

/// Encoder settings. Codec, bitrate and chunk length are never derived from
/// the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscoderSettings {
    pub binary_path: PathBuf,
    pub codec: String,
    pub bitrate_kbps: u32,
    pub chunk_seconds: u32,
}

impl Default for TranscoderSettings {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from(DEFAULT_FFMPEG),
            codec: DEFAULT_CODEC.to_string(),
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
            chunk_seconds: DEFAULT_CHUNK_SECONDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobStoreSettings {
    Fs {
        root: PathBuf,
    },
    Http {
        base_url: String,
        bucket: String,
        token: Option<String>,
        /// Client-wide request timeout. Unset means requests only end on
        /// completion or cancellation.
        timeout_secs: Option<u64>,
    },
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let scratch_dir = file
            .scratch_dir
            .map(PathBuf::from)
            .or_else(|| cli.scratch_dir.clone())
            .unwrap_or_else(|| std::env::temp_dir().join("sample-store"));

        if scratch_dir.exists() && !scratch_dir.is_dir() {
            bail!("scratch_dir is not a directory: {:?}", scratch_dir);
        }

        let max_upload_bytes = file
            .max_upload_bytes
            .or(cli.max_upload_bytes)
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
        if max_upload_bytes == 0 {
            bail!("max_upload_bytes must be greater than zero");
        }

        let accepted_mimetypes = file.accepted_mimetypes.unwrap_or_default();
        for mimetype in &accepted_mimetypes {
            if !mimes::is_supported(mimetype) {
                bail!("Unsupported mimetype in accepted_mimetypes: {}", mimetype);
            }
        }

        let request_timeout = file
            .request_timeout_secs
            .or(cli.request_timeout_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        // Transcoder settings - merge file config with defaults
        let tc_file = file.transcoder.unwrap_or_default();
        let transcoder = TranscoderSettings {
            binary_path: tc_file
                .binary_path
                .map(PathBuf::from)
                .or_else(|| cli.ffmpeg.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG)),
            codec: tc_file.codec.unwrap_or_else(|| DEFAULT_CODEC.to_string()),
            bitrate_kbps: tc_file.bitrate_kbps.unwrap_or(DEFAULT_BITRATE_KBPS),
            chunk_seconds: tc_file.chunk_seconds.unwrap_or(DEFAULT_CHUNK_SECONDS),
        };
        if transcoder.bitrate_kbps == 0 {
            bail!("transcoder.bitrate_kbps must be greater than zero");
        }
        if transcoder.chunk_seconds == 0 {
            bail!("transcoder.chunk_seconds must be greater than zero");
        }

        let blob_store = resolve_blob_store(cli, file.blob_store.unwrap_or_default())?;

        Ok(Self {
            scratch_dir,
            max_upload_bytes,
            accepted_mimetypes,
            request_timeout,
            transcoder,
            blob_store,
        })
    }

    pub fn ingestion_config(&self) -> IngestionConfig {
        IngestionConfig {
            max_upload_bytes: self.max_upload_bytes,
            accepted_mimetypes: self.accepted_mimetypes.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

fn resolve_blob_store(cli: &CliConfig, file: BlobStoreConfig) -> Result<BlobStoreSettings> {
    let base_url = file.base_url.or_else(|| cli.blob_url.clone());
    let root = file
        .root
        .map(PathBuf::from)
        .or_else(|| cli.blob_root.clone());

    // Without an explicit backend, a configured URL selects HTTP.
    let backend = file.backend.unwrap_or_else(|| {
        if base_url.is_some() {
            "http".to_string()
        } else {
            "fs".to_string()
        }
    });

    match backend.to_lowercase().as_str() {
        "fs" => {
            let root = root.ok_or_else(|| {
                anyhow::anyhow!("blob_store.root must be specified for the fs backend")
            })?;
            Ok(BlobStoreSettings::Fs { root })
        }
        "http" => {
            let base_url = base_url.ok_or_else(|| {
                anyhow::anyhow!("blob_store.base_url must be specified for the http backend")
            })?;
            let bucket = file
                .bucket
                .or_else(|| cli.bucket.clone())
                .ok_or_else(|| anyhow::anyhow!("blob_store.bucket must be specified"))?;
            Ok(BlobStoreSettings::Http {
                base_url,
                bucket,
                token: file.token,
                timeout_secs: file.timeout_secs.filter(|secs| *secs > 0),
            })
        }
        other => bail!("Unknown blob_store.backend: {}", other),
    }
}
