use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sample_store::blob_store;
use sample_store::config::{AppConfig, CliConfig, FileConfig};
use sample_store::ingestion::{
    content_sum, FfmpegTranscoder, IngestRequest, IngestionService, LocalScratch,
    PcmWaveformGenerator,
};
use sample_store::mimes;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path_buf))
}

/// Ingest a local audio file and print the result as JSON.
#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the audio file to ingest.
    #[clap(value_parser = parse_path)]
    pub file: PathBuf,

    /// Path to a TOML config file. Values in the file override CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Mimetype of the file. Detected from the name or content when omitted.
    #[clap(long)]
    pub mimetype: Option<String>,

    /// Owner recorded in the logs.
    #[clap(long, default_value = "local")]
    pub owner: String,

    /// Directory for scratch files.
    #[clap(long, value_parser = parse_path)]
    pub scratch_dir: Option<PathBuf>,

    /// Maximum accepted upload size in bytes.
    #[clap(long)]
    pub max_upload_bytes: Option<u64>,

    /// Deadline for the whole ingest in seconds. 0 disables it.
    #[clap(long)]
    pub request_timeout_secs: Option<u64>,

    /// Path to the ffmpeg binary.
    #[clap(long, value_parser = parse_path)]
    pub ffmpeg: Option<PathBuf>,

    /// Root directory of the filesystem blob store.
    #[clap(long, value_parser = parse_path)]
    pub blob_root: Option<PathBuf>,

    /// Endpoint of an S3-compatible blob store. Takes precedence over --blob-root.
    #[clap(long)]
    pub blob_url: Option<String>,

    /// Bucket to use with --blob-url.
    #[clap(long)]
    pub bucket: Option<String>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            scratch_dir: self.scratch_dir.clone(),
            max_upload_bytes: self.max_upload_bytes,
            request_timeout_secs: self.request_timeout_secs,
            ffmpeg: self.ffmpeg.clone(),
            blob_root: self.blob_root.clone(),
            blob_url: self.blob_url.clone(),
            bucket: self.bucket.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    let data = tokio::fs::read(&cli_args.file)
        .await
        .with_context(|| format!("Failed to read {:?}", cli_args.file))?;

    let mimetype = match &cli_args.mimetype {
        Some(mimetype) => mimetype.clone(),
        None => {
            let filename = cli_args.file.file_name().and_then(|n| n.to_str());
            let detected = mimes::detect(filename, &data);
            if detected.is_empty() {
                bail!("Could not detect an audio format for {:?}", cli_args.file);
            }
            detected.to_string()
        }
    };

    info!("Using scratch directory {:?}", config.scratch_dir);
    let scratch = Arc::new(LocalScratch::new(&config.scratch_dir));
    scratch.init().await?;

    let transcoder = FfmpegTranscoder::new(config.transcoder.clone());
    if let Err(e) = transcoder.check_available().await {
        warn!("Transcoder is not available, ingestion will fail: {}", e);
    }

    let blob_store = blob_store::from_settings(&config.blob_store)?;
    let service = IngestionService::new(
        config.ingestion_config(),
        scratch,
        Arc::new(transcoder),
        blob_store,
        Arc::new(PcmWaveformGenerator::new()),
    )?;

    let shutdown = CancellationToken::new();
    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling ingest...");
            ctrl_c_token.cancel();
        }
    });

    let request = IngestRequest {
        sum: content_sum(&data),
        data,
        mimetype,
        owner: cli_args.owner.clone(),
    };
    let result = service.ingest(request, shutdown).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
