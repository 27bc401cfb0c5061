//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{mono_wav, wav_request, SpyTranscoder, TestPipeline};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::test]
//! async fn test_ingest() {
//!     let pipeline = TestPipeline::new(SpyTranscoder::new()).await;
//!     let result = pipeline
//!         .service
//!         .ingest(wav_request(mono_wav(1)), CancellationToken::new())
//!         .await
//!         .unwrap();
//!     assert_eq!(result.waveform.len(), 64);
//! }
//! ```

mod constants;
mod fixtures;
mod object_server;
mod pipeline;
mod spies;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::{mono_wav, silent_wav, wav_request};
#[allow(unused_imports)]
pub use object_server::ObjectServer;
#[allow(unused_imports)]
pub use pipeline::TestPipeline;
#[allow(unused_imports)]
pub use spies::{SpyTranscoder, SpyWaveform};
