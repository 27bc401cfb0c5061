//! Sample Store Library
//!
//! Ingestion core for user-submitted audio samples: transcoding to stream
//! chunks and a canonical WAV, content-addressed storage and waveform
//! summaries.

pub mod blob_store;
pub mod config;
pub mod ingestion;
pub mod mimes;

// Re-export commonly used types for convenience
pub use blob_store::{BlobStore, FsBlobStore, HttpBlobStore};
pub use config::{AppConfig, CliConfig, FileConfig};
pub use ingestion::{IngestRequest, IngestResult, IngestionError, IngestionService};
