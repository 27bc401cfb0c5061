//! Audio sample ingestion.
//!
//! Each upload goes through the same pipeline:
//! 1. The payload is checked against its claimed SHA-256, mimetype and size
//! 2. The source is staged in scratch storage
//! 3. Stream chunks and a canonical WAV are encoded concurrently and uploaded
//! 4. A 64-element waveform is computed from the WAV
//! 5. Scratch files are removed

mod metrics;
mod scratch;
mod service;
mod transcoder;
mod waveform;

pub use metrics::IngestionMetrics;
pub use scratch::{LocalScratch, ScratchError, ScratchStorage};
pub use service::{
    content_sum, IngestRequest, IngestResult, IngestionConfig, IngestionError, IngestionService,
};
pub use transcoder::{
    stream_chunks_template, stream_index_path, EncodeRequest, FfmpegTranscoder, StreamOutput,
    TranscodeError, Transcoder, WavOutput,
};
pub use waveform::{
    decode_samples, reduce, DecodeError, PcmWaveformGenerator, WaveformGenerator, WAVEFORM_LEN,
};

#[cfg(feature = "mock")]
pub use scratch::MockScratchStorage;
#[cfg(feature = "mock")]
pub use transcoder::MockTranscoder;
#[cfg(feature = "mock")]
pub use waveform::MockWaveformGenerator;
