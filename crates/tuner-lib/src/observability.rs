//! Observability infrastructure for the tuning controller
//!
//! Provides:
//! - Prometheus metrics (cycle latency, training latency, publication counters, bundle guid)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter,
    IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for cycle and training latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<TunerMetricsInner> = OnceLock::new();

struct TunerMetricsInner {
    cycle_latency_seconds: Histogram,
    training_latency_seconds: Histogram,
    regions_trained: IntGauge,
    regions_skipped: IntGauge,
    bundles_published: IntCounter,
    publishes_suppressed: IntCounter,
    lookup_misses: IntCounter,
    frame_watermark: IntGauge,
    bundle_guid: IntGauge,
}

impl TunerMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "region_tuner_cycle_latency_seconds",
                "Time spent in one aggregate-train-publish cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            training_latency_seconds: register_histogram!(
                "region_tuner_training_latency_seconds",
                "Time spent inducing region models in one cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register training_latency_seconds"),

            regions_trained: register_int_gauge!(
                "region_tuner_regions_trained",
                "Regions with a trained model in the latest bundle"
            )
            .expect("Failed to register regions_trained"),

            regions_skipped: register_int_gauge!(
                "region_tuner_regions_skipped",
                "Observed regions served by the fallback rule in the latest bundle"
            )
            .expect("Failed to register regions_skipped"),

            bundles_published: register_int_counter!(
                "region_tuner_bundles_published_total",
                "Total number of bundles sent on the trigger channel"
            )
            .expect("Failed to register bundles_published"),

            publishes_suppressed: register_int_counter!(
                "region_tuner_publishes_suppressed_total",
                "Total number of cycles whose bundle matched the previous one"
            )
            .expect("Failed to register publishes_suppressed"),

            lookup_misses: register_int_counter!(
                "region_tuner_lookup_misses_total",
                "Total number of trace replay lookups served by extrapolation"
            )
            .expect("Failed to register lookup_misses"),

            frame_watermark: register_int_gauge!(
                "region_tuner_frame_watermark",
                "Last telemetry frame consumed by the control loop"
            )
            .expect("Failed to register frame_watermark"),

            bundle_guid: register_int_gauge!(
                "region_tuner_bundle_guid",
                "Guid of the most recently published bundle"
            )
            .expect("Failed to register bundle_guid"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Debug, Clone)]
pub struct TunerMetrics {
    _private: (),
}

impl Default for TunerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TunerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(TunerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &TunerMetricsInner {
        GLOBAL_METRICS.get_or_init(TunerMetricsInner::new)
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
    }

    pub fn observe_training_latency(&self, duration_secs: f64) {
        self.inner().training_latency_seconds.observe(duration_secs);
    }

    /// Update trained/skipped region gauges
    pub fn set_region_counts(&self, trained: i64, skipped: i64) {
        self.inner().regions_trained.set(trained);
        self.inner().regions_skipped.set(skipped);
    }

    pub fn inc_bundles_published(&self) {
        self.inner().bundles_published.inc();
    }

    pub fn inc_publishes_suppressed(&self) {
        self.inner().publishes_suppressed.inc();
    }

    pub fn add_lookup_misses(&self, count: u64) {
        self.inner().lookup_misses.inc_by(count);
    }

    pub fn set_frame_watermark(&self, frame: u64) {
        self.inner().frame_watermark.set(frame as i64);
    }

    pub fn set_bundle_guid(&self, guid: u64) {
        self.inner().bundle_guid.set(guid as i64);
    }
}

/// Structured logger for controller events
///
/// Every event carries a stable `event` field so log pipelines can
/// filter on it.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_startup(&self, version: &str, channel: &str) {
        info!(
            event = "controller_started",
            instance = %self.instance,
            controller_version = %version,
            channel = %channel,
            "Tuning controller started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Tuning controller shutting down"
        );
    }

    /// Log the end of one control cycle with per-stage timings
    #[allow(clippy::too_many_arguments)]
    pub fn log_cycle(
        &self,
        step: u64,
        watermark: u64,
        samples: usize,
        rows: usize,
        regions_trained: usize,
        aggregate_ms: u128,
        train_ms: u128,
        serialize_ms: u128,
    ) {
        info!(
            event = "cycle_completed",
            instance = %self.instance,
            step = step,
            watermark = watermark,
            samples = samples,
            rows = rows,
            regions_trained = regions_trained,
            aggregate_ms = aggregate_ms,
            train_ms = train_ms,
            serialize_ms = serialize_ms,
            "Control cycle completed"
        );
    }

    pub fn log_published(&self, step: u64, guid: u64, channel: &str, bytes: usize) {
        info!(
            event = "bundle_published",
            instance = %self.instance,
            step = step,
            guid = guid,
            channel = %channel,
            bytes = bytes,
            "Bundle published"
        );
    }

    pub fn log_suppressed(&self, step: u64, guid: u64) {
        info!(
            event = "publish_suppressed",
            instance = %self.instance,
            step = step,
            guid = guid,
            "Bundle unchanged, skipping publication"
        );
    }

    /// Warn about regions served by the fallback rule
    pub fn log_coverage_gap(&self, step: u64, regions: &[String]) {
        if regions.is_empty() {
            return;
        }
        warn!(
            event = "coverage_gap",
            instance = %self.instance,
            step = step,
            count = regions.len(),
            regions = ?regions,
            "Regions without a trained model fall back to the default policy"
        );
    }

    pub fn log_lookup_misses(&self, misses: u64, lookups: u64) {
        if misses == 0 {
            return;
        }
        warn!(
            event = "lookup_misses",
            instance = %self.instance,
            misses = misses,
            lookups = lookups,
            "Replay lookups extrapolated from average time per element"
        );
    }
}
