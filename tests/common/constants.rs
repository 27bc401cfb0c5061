//! Shared constants for integration tests

/// Length of the synthetic upload fixture.
pub const FIXTURE_SECONDS: u32 = 10;

/// Sample rate of the synthetic upload fixture.
pub const FIXTURE_SAMPLE_RATE: u32 = 44100;

/// Number of chunks the spy transcoder writes per stream encode.
pub const SPY_CHUNK_COUNT: usize = 3;

/// Owner attached to every test request.
pub const TEST_OWNER: &str = "test-owner";

/// Bucket served by the in-process object server.
pub const TEST_BUCKET: &str = "samples";
