//! Prometheus metrics for the sampling client.
//!
//! # Feature Flag
//!
//! Metrics are only collected when the `metrics` feature is enabled:
//!
//! ```toml
//! [dependencies]
//! graphps-client = { version = "*", features = ["metrics"] }
//! ```
//!
//! # Metrics Exported
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `graphps_operations_total` | CounterVec | Public operations by kind |
//! | `graphps_calls_total` | CounterVec | Server calls by outcome |
//! | `graphps_call_latency_seconds` | Histogram | Latency of single server calls |
//! | `graphps_operation_latency_seconds` | Histogram | Latency of whole fan-outs |

use std::time::Duration;

#[cfg(feature = "metrics")]
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

/// Error type for metrics operations.
#[derive(Debug)]
pub struct MetricsError(String);

impl std::fmt::Display for MetricsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MetricsError: {}", self.0)
    }
}

impl std::error::Error for MetricsError {}

#[cfg(feature = "metrics")]
impl From<prometheus::Error> for MetricsError {
    fn from(e: prometheus::Error) -> Self {
        MetricsError(e.to_string())
    }
}

#[cfg(feature = "metrics")]
fn latency_buckets() -> Vec<f64> {
    vec![
        0.0001, // 100μs
        0.0005, // 500μs
        0.001,  // 1ms
        0.005,  // 5ms
        0.01,   // 10ms
        0.025,  // 25ms
        0.05,   // 50ms
        0.1,    // 100ms
        0.25,   // 250ms
        0.5,    // 500ms
        1.0,    // 1s
    ]
}

/// Metrics registry for the sampling client.
#[cfg(feature = "metrics")]
pub struct ClientMetrics {
    registry: Registry,
    operations: IntCounterVec,
    calls: IntCounterVec,
    call_latency: Histogram,
    operation_latency: Histogram,
}

#[cfg(feature = "metrics")]
impl ClientMetrics {
    /// Creates a new registry with all metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new("graphps_operations_total", "Public client operations by kind"),
            &["operation"],
        )?;

        let calls = IntCounterVec::new(
            Opts::new("graphps_calls_total", "Server calls by outcome"),
            &["outcome"],
        )?;

        let call_latency = Histogram::with_opts(
            HistogramOpts::new("graphps_call_latency_seconds", "Server call latency in seconds")
                .buckets(latency_buckets()),
        )?;

        let operation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "graphps_operation_latency_seconds",
                "Fan-out latency in seconds, from dispatch to the last reply",
            )
            .buckets(latency_buckets()),
        )?;

        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(calls.clone()))?;
        registry.register(Box::new(call_latency.clone()))?;
        registry.register(Box::new(operation_latency.clone()))?;

        Ok(Self {
            registry,
            operations,
            calls,
            call_latency,
            operation_latency,
        })
    }

    /// Counts one public operation.
    pub fn record_operation(&self, operation: &str) {
        self.operations.with_label_values(&[operation]).inc();
    }

    /// Records the outcome and latency of one server call.
    pub fn record_call(&self, outcome: &str, latency: Duration) {
        self.calls.with_label_values(&[outcome]).inc();
        self.call_latency.observe(latency.as_secs_f64());
    }

    /// Records the latency of a complete fan-out.
    pub fn record_operation_latency(&self, latency: Duration) {
        self.operation_latency.observe(latency.as_secs_f64());
    }

    /// Number of calls recorded with `outcome`.
    pub fn calls_with_outcome(&self, outcome: &str) -> u64 {
        self.calls.with_label_values(&[outcome]).get()
    }

    /// Exports all metrics in Prometheus text format.
    pub fn export(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}

#[cfg(feature = "metrics")]
impl std::fmt::Debug for ClientMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMetrics")
            .field("call_latency_samples", &self.call_latency.get_sample_count())
            .field("operation_latency_samples", &self.operation_latency.get_sample_count())
            .finish()
    }
}

/// No-op metrics registry used when the `metrics` feature is disabled.
///
/// All methods are no-ops, so callers never need conditional compilation.
#[cfg(not(feature = "metrics"))]
#[derive(Debug, Clone, Default)]
pub struct ClientMetrics;

#[cfg(not(feature = "metrics"))]
impl ClientMetrics {
    /// Creates a new no-op registry.
    pub fn new() -> Result<Self, MetricsError> {
        Ok(Self)
    }

    /// No-op: Counts one public operation.
    pub fn record_operation(&self, _operation: &str) {}

    /// No-op: Records a server call.
    pub fn record_call(&self, _outcome: &str, _latency: Duration) {}

    /// No-op: Records fan-out latency.
    pub fn record_operation_latency(&self, _latency: Duration) {}

    /// Returns 0 (no data).
    pub fn calls_with_outcome(&self, _outcome: &str) -> u64 {
        0
    }

    /// Returns an empty string (no metrics to export).
    pub fn export(&self) -> Result<String, MetricsError> {
        Ok(String::new())
    }
}
