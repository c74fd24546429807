//! Observability infrastructure for the control core
//!
//! Provides:
//! - Prometheus metrics (table sizes, anomaly counts, cycle latency)
//! - Structured logging via tracing in the owning loops

use prometheus::{register_histogram, register_int_gauge, Histogram, IntGauge};
use std::sync::OnceLock;

/// Histogram buckets for cycle latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControlMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct ControlMetricsInner {
    novelty_keys: IntGauge,
    correlation_pairs: IntGauge,
    sensors_allocated: IntGauge,
    predictions_active: IntGauge,
    anomalies_detected: IntGauge,
    reallocation_latency_seconds: Histogram,
}

impl ControlMetricsInner {
    fn new() -> Self {
        Self {
            novelty_keys: register_int_gauge!(
                "adaptive_core_novelty_keys",
                "Number of (sensor, attribute) keys with novelty statistics"
            )
            .expect("Failed to register novelty_keys"),

            correlation_pairs: register_int_gauge!(
                "adaptive_core_correlation_pairs",
                "Number of tracked sensor correlation pairs"
            )
            .expect("Failed to register correlation_pairs"),

            sensors_allocated: register_int_gauge!(
                "adaptive_core_sensors_allocated",
                "Number of sensors covered by the latest allocation cycle"
            )
            .expect("Failed to register sensors_allocated"),

            predictions_active: register_int_gauge!(
                "adaptive_core_predictions_active",
                "Number of sensors with an active predictive factor"
            )
            .expect("Failed to register predictions_active"),

            anomalies_detected: register_int_gauge!(
                "adaptive_core_anomalies_detected_total",
                "Total number of novelty events fired"
            )
            .expect("Failed to register anomalies_detected"),

            reallocation_latency_seconds: register_histogram!(
                "adaptive_core_reallocation_latency_seconds",
                "Time spent in one resource arbiter allocation cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register reallocation_latency_seconds"),
        }
    }
}

/// Metrics handle for the control loops
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ControlMetrics {
    _private: (),
}

impl Default for ControlMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControlMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControlMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn set_novelty_keys(&self, count: i64) {
        self.inner().novelty_keys.set(count);
    }

    pub fn set_correlation_pairs(&self, count: i64) {
        self.inner().correlation_pairs.set(count);
    }

    pub fn set_sensors_allocated(&self, count: i64) {
        self.inner().sensors_allocated.set(count);
    }

    pub fn set_predictions_active(&self, count: i64) {
        self.inner().predictions_active.set(count);
    }

    pub fn inc_anomalies_detected(&self) {
        self.inner().anomalies_detected.inc();
    }

    pub fn observe_reallocation_latency(&self, duration_secs: f64) {
        self.inner().reallocation_latency_seconds.observe(duration_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The metrics are process-global and other tests in this binary run
    // concurrently, so assertions are monotone (>=) rather than exact.

    #[test]
    fn test_handles_share_the_global_counter() {
        let a = ControlMetrics::new();
        let b = ControlMetrics::new();

        let before = a.inner().anomalies_detected.get();
        b.inc_anomalies_detected();
        assert!(a.inner().anomalies_detected.get() >= before + 1);
    }

    #[test]
    fn test_reallocation_latency_is_observed() {
        let metrics = ControlMetrics::new();
        let before = metrics.inner().reallocation_latency_seconds.get_sample_count();
        metrics.observe_reallocation_latency(0.002);
        assert!(
            metrics.inner().reallocation_latency_seconds.get_sample_count() >= before + 1
        );
    }
}
