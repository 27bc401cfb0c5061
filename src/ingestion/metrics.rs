use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all sample store metrics
const PREFIX: &str = "sample_store";

/// Counters for one ingestion service, registered in their own registry.
#[derive(Clone)]
pub struct IngestionMetrics {
    registry: Registry,
    ingests_started: IntCounter,
    ingests_succeeded: IntCounter,
    ingests_failed: IntCounterVec,
    bytes_ingested: IntCounter,
    ingest_duration: Histogram,
    downloads_served: IntCounter,
}

impl IngestionMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let ingests_started = IntCounter::new(
            format!("{PREFIX}_ingests_started_total"),
            "Total ingest requests accepted for processing",
        )?;
        let ingests_succeeded = IntCounter::new(
            format!("{PREFIX}_ingests_succeeded_total"),
            "Total ingest requests that completed",
        )?;
        let ingests_failed = IntCounterVec::new(
            Opts::new(
                format!("{PREFIX}_ingests_failed_total"),
                "Total ingest requests that failed",
            ),
            &["kind"],
        )?;
        let bytes_ingested = IntCounter::new(
            format!("{PREFIX}_bytes_ingested_total"),
            "Total source bytes of completed ingests",
        )?;
        let ingest_duration = Histogram::with_opts(
            HistogramOpts::new(
                format!("{PREFIX}_ingest_duration_seconds"),
                "Ingest pipeline duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        )?;
        let downloads_served = IntCounter::new(
            format!("{PREFIX}_downloads_served_total"),
            "Total canonical WAV downloads served",
        )?;

        registry.register(Box::new(ingests_started.clone()))?;
        registry.register(Box::new(ingests_succeeded.clone()))?;
        registry.register(Box::new(ingests_failed.clone()))?;
        registry.register(Box::new(bytes_ingested.clone()))?;
        registry.register(Box::new(ingest_duration.clone()))?;
        registry.register(Box::new(downloads_served.clone()))?;

        Ok(Self {
            registry,
            ingests_started,
            ingests_succeeded,
            ingests_failed,
            bytes_ingested,
            ingest_duration,
            downloads_served,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn record_started(&self) {
        self.ingests_started.inc();
    }

    pub(crate) fn record_succeeded(&self, bytes: usize, duration: Duration) {
        self.ingests_succeeded.inc();
        self.bytes_ingested.inc_by(bytes as u64);
        self.ingest_duration.observe(duration.as_secs_f64());
    }

    pub(crate) fn record_failed(&self, kind: &str, duration: Duration) {
        self.ingests_failed.with_label_values(&[kind]).inc();
        self.ingest_duration.observe(duration.as_secs_f64());
    }

    pub(crate) fn record_download(&self) {
        self.downloads_served.inc();
    }

    pub fn ingests_started(&self) -> u64 {
        self.ingests_started.get()
    }

    pub fn ingests_succeeded(&self) -> u64 {
        self.ingests_succeeded.get()
    }

    pub fn ingests_failed(&self, kind: &str) -> u64 {
        self.ingests_failed.with_label_values(&[kind]).get()
    }

    pub fn bytes_ingested(&self) -> u64 {
        self.bytes_ingested.get()
    }

    pub fn downloads_served(&self) -> u64 {
        self.downloads_served.get()
    }

    /// Render every metric in the Prometheus text exposition format.
    pub fn gather_text(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
