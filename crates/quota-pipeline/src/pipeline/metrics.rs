//! Telemetry sink used by the pipeline to report store latency.
//!
//! The pipeline only knows this trait. The binary plugs in the
//! OpenTelemetry-backed sink from [`crate::server::telemetry`]; tests plug in
//! a recorder.

use quota_pipeline_core::Method;

/// Histogram of store call latency, in milliseconds.
pub const STORE_LATENCY_MS: &str = "pipeline.store.latency_ms";

/// Tags attached to every store latency sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricTags {
    pub method: Method,
    pub bucket_type: String,
    /// Present only when the store result carried a `conformant` flag.
    pub conformant: Option<bool>,
}

pub trait MetricsSink: Send + Sync {
    fn record_histogram(&self, name: &'static str, value: f64, tags: &MetricTags);
}

/// Discards every sample.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_histogram(&self, _name: &'static str, _value: f64, _tags: &MetricTags) {}
}
