//! Spy collaborators
//!
//! Hand-written doubles that record how often they were called. The spy
//! transcoder writes plausible stream and WAV outputs without ffmpeg.

use async_trait::async_trait;
use sample_store::ingestion::{
    stream_index_path, DecodeError, EncodeRequest, PcmWaveformGenerator, StreamOutput,
    TranscodeError, Transcoder, WaveformGenerator, WavOutput,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use super::constants::SPY_CHUNK_COUNT;

#[derive(Default)]
pub struct SpyTranscoder {
    stream_calls: AtomicUsize,
    wav_calls: AtomicUsize,
    fail_stream: bool,
    fail_wav: bool,
    block_until_cancelled: bool,
}

impl SpyTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// WAV encodes fail, stream encodes succeed.
    pub fn failing_wav() -> Self {
        Self {
            fail_wav: true,
            ..Default::default()
        }
    }

    /// Both encodes fail with distinguishable diagnostics.
    pub fn failing_both() -> Self {
        Self {
            fail_stream: true,
            fail_wav: true,
            ..Default::default()
        }
    }

    /// Both encodes hang until the request is cancelled.
    pub fn blocking() -> Self {
        Self {
            block_until_cancelled: true,
            ..Default::default()
        }
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn wav_calls(&self) -> usize {
        self.wav_calls.load(Ordering::SeqCst)
    }
}

fn failure(diagnostics: &str) -> TranscodeError {
    TranscodeError::Failed {
        status: "exit status: 1".to_string(),
        diagnostics: diagnostics.to_string(),
    }
}

fn chunk_path(stem: &Path, index: usize) -> PathBuf {
    PathBuf::from(format!("{}{:03}.ts", stem.display(), index))
}

#[async_trait]
impl Transcoder for SpyTranscoder {
    async fn stream(
        &self,
        req: &EncodeRequest,
        cancel: &CancellationToken,
    ) -> Result<StreamOutput, TranscodeError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if self.block_until_cancelled {
            cancel.cancelled().await;
            return Err(TranscodeError::Cancelled);
        }
        if self.fail_stream {
            return Err(failure("stream encode failed"));
        }

        if let Some(parent) = req.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut index = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n");
        let mut segment_paths = Vec::new();
        for i in 0..SPY_CHUNK_COUNT {
            let path = chunk_path(&req.output_path, i);
            tokio::fs::write(&path, format!("chunk {}", i)).await?;
            index.push_str("#EXTINF:10.000000,\n");
            index.push_str(&path.file_name().unwrap().to_string_lossy());
            index.push('\n');
            segment_paths.push(path);
        }
        index.push_str("#EXT-X-ENDLIST\n");

        let index_path = stream_index_path(&req.output_path);
        tokio::fs::write(&index_path, index).await?;

        Ok(StreamOutput {
            index_path,
            segment_paths,
            diagnostics: String::new(),
        })
    }

    async fn wav(
        &self,
        req: &EncodeRequest,
        cancel: &CancellationToken,
    ) -> Result<WavOutput, TranscodeError> {
        self.wav_calls.fetch_add(1, Ordering::SeqCst);
        if self.block_until_cancelled {
            cancel.cancelled().await;
            return Err(TranscodeError::Cancelled);
        }
        if self.fail_wav {
            return Err(failure("wav encode failed"));
        }

        if let Some(parent) = req.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&req.input_path, &req.output_path).await?;

        Ok(WavOutput {
            path: req.output_path.clone(),
            diagnostics: String::new(),
        })
    }
}

/// Real PCM waveform generator that counts its calls.
#[derive(Default)]
pub struct SpyWaveform {
    inner: PcmWaveformGenerator,
    calls: AtomicUsize,
}

impl SpyWaveform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WaveformGenerator for SpyWaveform {
    async fn waveform(&self, path: &Path) -> Result<Vec<i32>, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.waveform(path).await
    }
}
