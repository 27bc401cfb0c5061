//! Audio transcoding through an external encoder (ffmpeg).

use crate::config::TranscoderSettings;
use crate::mimes;
use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const CANONICAL_BITS_PER_SAMPLE: u16 = 16;
const CANONICAL_CHANNELS: u16 = 2;
const CANONICAL_SAMPLE_RATE: u32 = 44100;

/// Errors that can occur during transcoding.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("encoder failed ({status}): {diagnostics}")]
    Failed { status: String, diagnostics: String },

    #[error("could not start encoder {binary:?}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("encoding cancelled")]
    Cancelled,
}

/// Input and destination of a single encode.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    /// Canonical mimetype of the input.
    pub mimetype: String,
    pub input_path: PathBuf,
    /// Destination. For stream output this is the stem that index and chunk
    /// names are derived from; for WAV output it is the file itself.
    pub output_path: PathBuf,
}

/// Result of a chunked stream encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutput {
    pub index_path: PathBuf,
    /// Chunk files in playback order.
    pub segment_paths: Vec<PathBuf>,
    /// Captured encoder output, empty when no encoder ran.
    pub diagnostics: String,
}

/// Result of a canonical WAV encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavOutput {
    pub path: PathBuf,
    pub diagnostics: String,
}

/// Capability to produce the two playback derivatives of an upload.
///
/// Both operations are idempotent: an existing destination is returned as-is
/// without re-encoding.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Re-encode into fixed-duration chunks plus an index manifest.
    async fn stream(
        &self,
        req: &EncodeRequest,
        cancel: &CancellationToken,
    ) -> Result<StreamOutput, TranscodeError>;

    /// Re-encode into the canonical 16-bit/2ch/44.1kHz WAV. A WAV source
    /// already in that format is copied.
    async fn wav(
        &self,
        req: &EncodeRequest,
        cancel: &CancellationToken,
    ) -> Result<WavOutput, TranscodeError>;
}

/// Index manifest path for a stream output stem: `<stem>.m3u8`.
pub fn stream_index_path(output_path: &Path) -> PathBuf {
    with_suffix(output_path, ".m3u8")
}

/// Chunk filename template for a stream output stem: `<stem>%03d.ts`.
pub fn stream_chunks_template(output_path: &Path) -> PathBuf {
    with_suffix(output_path, "%03d.ts")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Transcoder backed by the ffmpeg command line tool.
pub struct FfmpegTranscoder {
    settings: TranscoderSettings,
    invocations: AtomicUsize,
}

impl FfmpegTranscoder {
    pub fn new(settings: TranscoderSettings) -> Self {
        Self {
            settings,
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn settings(&self) -> &TranscoderSettings {
        &self.settings
    }

    /// Number of times the encoder process has been started by this instance.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Check that the configured binary can be executed.
    pub async fn check_available(&self) -> Result<(), TranscodeError> {
        let status = Command::new(&self.settings.binary_path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|source| TranscodeError::Spawn {
                binary: self.settings.binary_path.clone(),
                source,
            })?;

        if !status.success() {
            return Err(TranscodeError::Failed {
                status: status.to_string(),
                diagnostics: format!("{:?} -version failed", self.settings.binary_path),
            });
        }
        Ok(())
    }

    /// Run the encoder to completion, or kill it when `cancel` fires.
    ///
    /// Returns the combined stdout and stderr.
    async fn run(
        &self,
        args: Vec<OsString>,
        cancel: &CancellationToken,
    ) -> Result<String, TranscodeError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        debug!("Running {:?} {:?}", self.settings.binary_path, args);

        let child = Command::new(&self.settings.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::Spawn {
                binary: self.settings.binary_path.clone(),
                source,
            })?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = cancel.cancelled() => return Err(TranscodeError::Cancelled),
        };

        let mut diagnostics = String::from_utf8_lossy(&output.stdout).into_owned();
        diagnostics.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            error!(
                "Encode failure: {} cmd={:?} {:?}",
                output.status, self.settings.binary_path, args
            );
            return Err(TranscodeError::Failed {
                status: output.status.to_string(),
                diagnostics,
            });
        }

        Ok(diagnostics)
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn stream(
        &self,
        req: &EncodeRequest,
        cancel: &CancellationToken,
    ) -> Result<StreamOutput, TranscodeError> {
        let index_path = stream_index_path(&req.output_path);
        if tokio::fs::try_exists(&index_path).await? {
            debug!("Stream index {:?} already exists, skipping encode", index_path);
            let segment_paths = read_stream_index(&index_path).await?;
            return Ok(StreamOutput {
                index_path,
                segment_paths,
                diagnostics: String::new(),
            });
        }

        ensure_parent(&req.output_path).await?;

        let partial_index = with_suffix(&index_path, ".part");
        let args = stream_args(&self.settings, &req.input_path, &req.output_path, &partial_index);
        let diagnostics = self.run(args, cancel).await?;

        tokio::fs::rename(&partial_index, &index_path).await?;
        let segment_paths = read_stream_index(&index_path).await?;

        info!(
            "Encoded {:?} into {} stream chunks",
            req.input_path,
            segment_paths.len()
        );

        Ok(StreamOutput {
            index_path,
            segment_paths,
            diagnostics,
        })
    }

    async fn wav(
        &self,
        req: &EncodeRequest,
        cancel: &CancellationToken,
    ) -> Result<WavOutput, TranscodeError> {
        if tokio::fs::try_exists(&req.output_path).await? {
            debug!("WAV {:?} already exists, skipping encode", req.output_path);
            return Ok(WavOutput {
                path: req.output_path.clone(),
                diagnostics: String::new(),
            });
        }

        ensure_parent(&req.output_path).await?;
        let partial = with_suffix(&req.output_path, ".part");

        let copy =
            mimes::is_wav_compatible(&req.mimetype) && is_canonical_wav(&req.input_path).await;
        let diagnostics = if copy {
            tokio::select! {
                copied = tokio::fs::copy(&req.input_path, &partial) => { copied?; }
                _ = cancel.cancelled() => {
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(TranscodeError::Cancelled);
                }
            }
            String::new()
        } else {
            let args = wav_args(&req.input_path, &partial);
            self.run(args, cancel).await?
        };

        tokio::fs::rename(&partial, &req.output_path).await?;

        Ok(WavOutput {
            path: req.output_path.clone(),
            diagnostics,
        })
    }
}

/// Whether `path` is already 16-bit integer PCM, 2 channels, 44100 Hz.
///
/// Unreadable or malformed headers count as not canonical and go through
/// the encoder.
async fn is_canonical_wav(path: &Path) -> bool {
    let path = path.to_path_buf();
    let checked = tokio::task::spawn_blocking(move || {
        let spec = hound::WavReader::open(&path).ok()?.spec();
        Some(
            spec.sample_format == hound::SampleFormat::Int
                && spec.bits_per_sample == CANONICAL_BITS_PER_SAMPLE
                && spec.channels == CANONICAL_CHANNELS
                && spec.sample_rate == CANONICAL_SAMPLE_RATE,
        )
    })
    .await;

    matches!(checked, Ok(Some(true)))
}

async fn ensure_parent(path: &Path) -> Result<(), TranscodeError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

fn stream_args(
    settings: &TranscoderSettings,
    input_path: &Path,
    output_path: &Path,
    index_path: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    let mut push = |a: &OsStr| args.push(a.to_owned());

    push("-y".as_ref());
    push("-i".as_ref());
    push(input_path.as_os_str());
    push("-b:a".as_ref());
    push(format!("{}k", settings.bitrate_kbps).as_ref());
    push("-c:a".as_ref());
    push(settings.codec.as_ref());
    push("-f".as_ref());
    push("segment".as_ref());
    // Audio only, drops embedded artwork.
    push("-map".as_ref());
    push("a".as_ref());
    push("-segment_time".as_ref());
    push(settings.chunk_seconds.to_string().as_ref());
    push("-segment_list".as_ref());
    push(index_path.as_os_str());
    push("-segment_list_type".as_ref());
    push("m3u8".as_ref());
    push("-segment_format".as_ref());
    push("mpegts".as_ref());
    push(stream_chunks_template(output_path).as_os_str());

    args
}

fn wav_args(input_path: &Path, output_path: &Path) -> Vec<OsString> {
    let channels = CANONICAL_CHANNELS.to_string();
    let sample_rate = CANONICAL_SAMPLE_RATE.to_string();
    [
        OsStr::new("-y"),
        OsStr::new("-i"),
        input_path.as_os_str(),
        OsStr::new("-acodec"),
        OsStr::new("pcm_s16le"),
        OsStr::new("-ac"),
        OsStr::new(&channels),
        OsStr::new("-ar"),
        OsStr::new(&sample_rate),
        OsStr::new("-f"),
        OsStr::new("wav"),
        output_path.as_os_str(),
    ]
    .iter()
    .map(|a| a.to_os_string())
    .collect()
}

/// Read chunk paths from an m3u8 index, in listed order.
///
/// Entries are resolved against the index directory.
async fn read_stream_index(index_path: &Path) -> Result<Vec<PathBuf>, TranscodeError> {
    let content = tokio::fs::read_to_string(index_path).await?;
    let dir = index_path.parent().unwrap_or_else(|| Path::new(""));
    let segments = parse_stream_index(&content, dir);

    for segment in &segments {
        if !tokio::fs::try_exists(segment).await? {
            return Err(TranscodeError::InvalidOutput(format!(
                "index {:?} lists missing chunk {:?}",
                index_path, segment
            )));
        }
    }

    Ok(segments)
}

fn parse_stream_index(content: &str, dir: &Path) -> Vec<PathBuf> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|entry| {
            let entry = Path::new(entry);
            if entry.is_absolute() {
                entry.to_path_buf()
            } else {
                dir.join(entry.file_name().unwrap_or(entry.as_os_str()))
            }
        })
        .collect()
}
