//! Audio fixtures
//!
//! WAV files are synthesized in memory with hound so tests never depend on
//! binary assets.

use super::constants::*;
use sample_store::ingestion::content_sum;
use sample_store::IngestRequest;
use std::io::Cursor;

/// A mono 16-bit WAV whose amplitude ramps up over `seconds`.
pub fn mono_wav(seconds: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: FIXTURE_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let total = (seconds * FIXTURE_SAMPLE_RATE) as usize;
    let mut buf = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut buf), spec).unwrap();
        for i in 0..total {
            let t = i as f64 / FIXTURE_SAMPLE_RATE as f64;
            let envelope = 20_000.0 * (i as f64 / total as f64);
            let sample = (t * 440.0 * std::f64::consts::TAU).sin() * envelope;
            writer.write_sample(sample as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    buf
}

/// A mono WAV containing only zeros.
pub fn silent_wav(seconds: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: FIXTURE_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut buf = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut buf), spec).unwrap();
        for _ in 0..seconds * FIXTURE_SAMPLE_RATE {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    buf
}

/// A well-formed request for `data`.
pub fn wav_request(data: Vec<u8>) -> IngestRequest {
    IngestRequest {
        sum: content_sum(&data),
        data,
        mimetype: "audio/wave".to_string(),
        owner: TEST_OWNER.to_string(),
    }
}
