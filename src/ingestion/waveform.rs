//! Waveform summaries for client-side visualization.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Number of elements in every waveform.
pub const WAVEFORM_LEN: usize = 64;

const SCALE_LOW: i64 = 16;
const SCALE_HIGH: i64 = 80;
const FLOOR: i32 = 1;

/// Errors that can occur while decoding PCM input.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to decode {path:?}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("Unsupported sample format in {path:?}: {format}")]
    UnsupportedFormat { path: PathBuf, format: String },

    #[error("Decoder task failed: {0}")]
    Task(String),
}

#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait WaveformGenerator: Send + Sync {
    /// Compute the waveform of the WAV file at `path`.
    async fn waveform(&self, path: &Path) -> Result<Vec<i32>, DecodeError>;
}

/// Waveform generator that decodes integer PCM WAV files.
#[derive(Debug, Default, Clone, Copy)]
pub struct PcmWaveformGenerator;

impl PcmWaveformGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WaveformGenerator for PcmWaveformGenerator {
    async fn waveform(&self, path: &Path) -> Result<Vec<i32>, DecodeError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let samples = decode_samples(&path)?;
            Ok(reduce(&samples))
        })
        .await
        .map_err(|e| DecodeError::Task(e.to_string()))?
    }
}

/// Read every interleaved sample of an integer PCM WAV file.
pub fn decode_samples(path: &Path) -> Result<Vec<i32>, DecodeError> {
    let malformed = |source| DecodeError::Malformed {
        path: path.to_path_buf(),
        source,
    };

    let reader = hound::WavReader::open(path).map_err(malformed)?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int {
        return Err(DecodeError::UnsupportedFormat {
            path: path.to_path_buf(),
            format: format!("{:?} {}-bit", spec.sample_format, spec.bits_per_sample),
        });
    }

    reader
        .into_samples::<i32>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(malformed)
}

/// Reduce a sample sequence to [`WAVEFORM_LEN`] values in `[1, 65]`.
///
/// Samples are split into equal buckets of `len / 64`, with the remainder
/// folded into the last one. Each bucket contributes the mean magnitude of its
/// samples, and the means are rescaled between their own min and max. When
/// every mean is equal the result is all `1`.
pub fn reduce(samples: &[i32]) -> Vec<i32> {
    let means = bucket_means(samples);

    let min = means.iter().copied().min().unwrap_or(0);
    let max = means.iter().copied().max().unwrap_or(0);
    if max == min {
        return vec![FLOOR; WAVEFORM_LEN];
    }

    means
        .iter()
        .map(|&v| FLOOR + ((v - min) * (SCALE_HIGH - SCALE_LOW) / (max - min)) as i32)
        .collect()
}

fn bucket_means(samples: &[i32]) -> [i64; WAVEFORM_LEN] {
    let mut means = [0i64; WAVEFORM_LEN];
    let width = samples.len() / WAVEFORM_LEN;

    for (i, mean) in means.iter_mut().enumerate() {
        let start = i * width;
        let end = if i == WAVEFORM_LEN - 1 {
            samples.len()
        } else {
            start + width
        };
        let bucket = &samples[start..end];
        if bucket.is_empty() {
            continue;
        }
        let total: i64 = bucket.iter().map(|&s| (s as i64).abs()).sum();
        *mean = total / bucket.len() as i64;
    }

    means
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ramp(len: usize) -> Vec<i32> {
        (0..len).map(|i| (i % 3000) as i32 * 10).collect()
    }

    fn write_wav(path: &Path, spec: hound::WavSpec, samples: &[i32]) {
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn int16_spec() -> hound::WavSpec {
        hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        }
    }

    #[test]
    fn test_reduce_is_deterministic() {
        let samples = ramp(10_000);
        assert_eq!(reduce(&samples), reduce(&samples));
    }

    #[test]
    fn test_reduce_length_and_range() {
        let samples: Vec<i32> = (0..64 * 100).map(|i| (i / 100) * 50 - 1600).collect();
        let waveform = reduce(&samples);
        assert_eq!(waveform.len(), WAVEFORM_LEN);
        assert!(waveform.iter().all(|&v| (1..=80).contains(&v)));
        assert!(waveform.contains(&1));
        assert!(waveform.contains(&65));
    }

    #[test]
    fn test_reduce_silence_is_floor() {
        let waveform = reduce(&vec![0; 44100]);
        assert_eq!(waveform, vec![1; WAVEFORM_LEN]);
    }

    #[test]
    fn test_reduce_empty_input_is_floor() {
        assert_eq!(reduce(&[]), vec![1; WAVEFORM_LEN]);
    }

    #[test]
    fn test_reduce_fewer_samples_than_buckets() {
        // Width is zero, so every sample lands in the last bucket.
        let waveform = reduce(&[100, -100, 100]);
        assert_eq!(waveform.len(), WAVEFORM_LEN);
        assert!(waveform[..WAVEFORM_LEN - 1].iter().all(|&v| v == 1));
        assert_eq!(waveform[WAVEFORM_LEN - 1], 65);
    }

    #[test]
    fn test_reduce_uses_magnitudes() {
        let mut samples = vec![0; 64 * 10];
        for s in &mut samples[..10] {
            *s = -1000;
        }
        let waveform = reduce(&samples);
        assert_eq!(waveform[0], 65);
        assert!(waveform[1..].iter().all(|&v| v == 1));
    }

    #[test]
    fn test_remainder_goes_to_last_bucket() {
        let mut samples = vec![0; 64 * 2 + 5];
        let len = samples.len();
        for s in &mut samples[len - 5..] {
            *s = 500;
        }
        let means = bucket_means(&samples);
        assert_eq!(means[WAVEFORM_LEN - 1], 500 * 5 / 7);
        assert!(means[..WAVEFORM_LEN - 1].iter().all(|&m| m == 0));
    }

    #[tokio::test]
    async fn test_waveform_from_wav_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tone.wav");
        let samples: Vec<i32> = (0..44100 * 2)
            .map(|i| ((i as f64 * 0.05).sin() * (i as f64 / 20.0)) as i32)
            .collect();
        write_wav(&path, int16_spec(), &samples);

        let waveform = PcmWaveformGenerator::new().waveform(&path).await.unwrap();
        assert_eq!(waveform, reduce(&samples));
        assert!(waveform.iter().all(|&v| (1..=80).contains(&v)));
    }

    #[tokio::test]
    async fn test_malformed_file_is_decode_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.wav");
        std::fs::write(&path, b"definitely not a wav file").unwrap();

        let result = PcmWaveformGenerator::new().waveform(&path).await;
        assert!(matches!(result, Err(DecodeError::Malformed { .. })));
    }

    #[tokio::test]
    async fn test_float_samples_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("float.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..1000 {
            writer.write_sample(i as f32 / 1000.0).unwrap();
        }
        writer.finalize().unwrap();

        let result = PcmWaveformGenerator::new().waveform(&path).await;
        assert!(matches!(result, Err(DecodeError::UnsupportedFormat { .. })));
    }
}
