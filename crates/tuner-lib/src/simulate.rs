//! Offline trace replay
//!
//! Projects a bundle over a recorded trace: every sample is re-decided by
//! the bundle and charged the best time measured for that decision. When
//! no measurement exists the time is extrapolated from the policy's
//! average time per element and the miss is tallied.

use crate::bundle::ModelBundle;
use crate::models::{AggregatedRow, TelemetrySample};
use crate::observability::{StructuredLogger, TunerMetrics};
use crate::rules::FALLBACK_POLICY;
use crate::telemetry::{feature_key, AggregatorConfig, TelemetryAggregator};
use std::collections::BTreeMap;
use tracing::debug;

/// Feature holding the element count of a region invocation
pub const DEFAULT_ELEMENT_FEATURE: &str = "num_elements";

type VectorKey = (String, Vec<(String, u64)>);

/// Mean of per-row time per element for one policy
#[derive(Debug, Clone, Copy, Default)]
struct ElementRate {
    ratio_sum: f64,
    rows: u64,
}

impl ElementRate {
    fn record(&mut self, elements: f64, time: f64) {
        self.ratio_sum += time / elements;
        self.rows += 1;
    }

    fn average(&self) -> Option<f64> {
        (self.rows > 0).then(|| self.ratio_sum / self.rows as f64)
    }
}

/// Per-region totals of a replay
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionReplay {
    pub samples: usize,
    pub trace_time: f64,
    pub model_time: f64,
    pub misses: u64,
}

/// Totals of one replay
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    pub samples: usize,
    /// Time recorded in the trace
    pub trace_time: f64,
    /// Time under the bundle's decisions
    pub model_time: f64,
    /// Time with the fastest measured policy everywhere
    pub best_time: f64,
    /// Time with the fallback policy everywhere
    pub default_time: f64,
    /// Decisions served by extrapolation
    pub misses: u64,
    /// How often each policy was chosen
    pub policy_counts: BTreeMap<u32, u64>,
    pub regions: BTreeMap<String, RegionReplay>,
}

impl ReplayReport {
    /// Trace time over model time; above 1.0 means the bundle is faster
    pub fn speedup(&self) -> Option<f64> {
        (self.model_time > 0.0).then(|| self.trace_time / self.model_time)
    }
}

/// Lookup tables built from aggregated rows
#[derive(Debug, Clone)]
pub struct TraceReplay {
    aggregator: TelemetryAggregator,
    element_feature: String,
    times: BTreeMap<(VectorKey, u32), f64>,
    best: BTreeMap<VectorKey, f64>,
    rates: BTreeMap<u32, ElementRate>,
    metrics: TunerMetrics,
    logger: StructuredLogger,
}

impl TraceReplay {
    pub fn new(rows: &[AggregatedRow]) -> Self {
        Self::with_config(rows, AggregatorConfig::default(), DEFAULT_ELEMENT_FEATURE)
    }

    pub fn with_config(
        rows: &[AggregatedRow],
        aggregator: AggregatorConfig,
        element_feature: impl Into<String>,
    ) -> Self {
        let mut replay = Self {
            aggregator: TelemetryAggregator::new(aggregator),
            element_feature: element_feature.into(),
            times: BTreeMap::new(),
            best: BTreeMap::new(),
            rates: BTreeMap::new(),
            metrics: TunerMetrics::new(),
            logger: StructuredLogger::new("replay"),
        };

        for row in rows {
            let vector = (row.region_name.clone(), feature_key(&row.features));

            let time = replay
                .times
                .entry((vector.clone(), row.policy_index))
                .or_insert(row.time_avg);
            *time = time.min(row.time_avg);

            let best = replay.best.entry(vector).or_insert(row.time_avg);
            *best = best.min(row.time_avg);

            if let Some(&elements) = row.features.get(&replay.element_feature) {
                if elements > 0.0 {
                    replay
                        .rates
                        .entry(row.policy_index)
                        .or_default()
                        .record(elements, row.time_avg);
                }
            }
        }

        debug!(
            entries = replay.times.len(),
            vectors = replay.best.len(),
            policies = replay.rates.len(),
            "Built replay lookup tables"
        );
        replay
    }

    /// Build tables straight from raw samples
    pub fn from_samples(
        samples: &[TelemetrySample],
        aggregator: AggregatorConfig,
        element_feature: impl Into<String>,
    ) -> Self {
        let rows = TelemetryAggregator::new(aggregator.clone()).aggregate(samples);
        Self::with_config(&rows, aggregator, element_feature)
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Best measured time of `policy` for one feature vector
    pub fn lookup(&self, region: &str, features: &BTreeMap<String, f64>, policy: u32) -> Option<f64> {
        let vector = (region.to_string(), feature_key(features));
        self.times.get(&(vector, policy)).copied()
    }

    pub fn avg_time_per_element(&self, policy: u32) -> Option<f64> {
        self.rates.get(&policy).and_then(ElementRate::average)
    }

    /// Replay `trace` against `bundle`
    pub fn replay(&self, bundle: &ModelBundle, trace: &[TelemetrySample]) -> ReplayReport {
        let mut report = ReplayReport::default();

        for sample in trace {
            let features: BTreeMap<String, f64> = sample
                .attributes
                .iter()
                .filter(|(name, _)| self.aggregator.is_feature(name))
                .map(|(name, value)| (name.clone(), *value))
                .collect();

            let policy = bundle
                .decide(&sample.region_name, &features)
                .unwrap_or(FALLBACK_POLICY);

            let (model_time, missed) = match self.lookup(&sample.region_name, &features, policy) {
                Some(time) => (time, false),
                None => (self.extrapolate(&features, policy, sample.time_avg), true),
            };

            let vector = (sample.region_name.clone(), feature_key(&features));
            let best_time = self.best.get(&vector).copied().unwrap_or(sample.time_avg);
            let default_time = self
                .lookup(&sample.region_name, &features, FALLBACK_POLICY)
                .unwrap_or(sample.time_avg);

            report.samples += 1;
            report.trace_time += sample.time_avg;
            report.model_time += model_time;
            report.best_time += best_time;
            report.default_time += default_time;
            *report.policy_counts.entry(policy).or_default() += 1;

            let region = report.regions.entry(sample.region_name.clone()).or_default();
            region.samples += 1;
            region.trace_time += sample.time_avg;
            region.model_time += model_time;

            if missed {
                report.misses += 1;
                region.misses += 1;
                debug!(
                    region = %sample.region_name,
                    policy = policy,
                    "No measurement for decision, extrapolating"
                );
            }
        }

        self.metrics.add_lookup_misses(report.misses);
        self.logger
            .log_lookup_misses(report.misses, report.samples as u64);

        report
    }

    /// Elements times the policy's average time per element
    ///
    /// Falls back to the fallback policy's rate, then to the recorded time.
    fn extrapolate(&self, features: &BTreeMap<String, f64>, policy: u32, recorded: f64) -> f64 {
        let Some(&elements) = features.get(&self.element_feature) else {
            return recorded;
        };
        self.avg_time_per_element(policy)
            .or_else(|| self.avg_time_per_element(FALLBACK_POLICY))
            .map(|rate| elements * rate)
            .unwrap_or(recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Pipeline;

    fn sample(region: &str, elements: f64, policy: u32, time: f64) -> TelemetrySample {
        TelemetrySample::new(region, policy, time)
            .with_attribute("num_elements", elements)
            .with_attribute("step", 3.0)
    }

    fn training() -> Vec<TelemetrySample> {
        vec![
            sample("R1", 10.0, 0, 5.0),
            sample("R1", 10.0, 1, 2.0),
            sample("R1", 100.0, 0, 50.0),
            sample("R1", 100.0, 1, 90.0),
        ]
    }

    fn replay_and_bundle() -> (TraceReplay, ModelBundle) {
        let samples = training();
        let replay = TraceReplay::from_samples(
            &samples,
            AggregatorConfig::default(),
            DEFAULT_ELEMENT_FEATURE,
        );
        let bundle = Pipeline::default().build(1, &[], &samples).bundle;
        (replay, bundle)
    }

    #[test]
    fn test_lookup_and_rates() {
        let (replay, _) = replay_and_bundle();
        let features: BTreeMap<String, f64> =
            [("num_elements".to_string(), 10.0)].into_iter().collect();

        assert_eq!(replay.lookup("R1", &features, 1), Some(2.0));
        assert_eq!(replay.lookup("R1", &features, 7), None);
        // policy 0: mean of 5 / 10 and 50 / 100
        assert_eq!(replay.avg_time_per_element(0), Some(0.5));
        assert_eq!(replay.avg_time_per_element(9), None);
    }

    #[test]
    fn test_rate_is_mean_of_row_ratios() {
        let rows: Vec<AggregatedRow> = [(1.0, 1.0), (10.0, 100.0)]
            .into_iter()
            .map(|(elements, time)| AggregatedRow {
                region_name: "R1".to_string(),
                features: [("num_elements".to_string(), elements)].into_iter().collect(),
                policy_index: 0,
                time_avg: time,
            })
            .collect();

        let replay = TraceReplay::new(&rows);
        // (1 / 1 + 100 / 10) / 2, not 101 / 11
        assert_eq!(replay.avg_time_per_element(0), Some(5.5));
    }

    #[test]
    fn test_replay_known_trace() {
        let (replay, bundle) = replay_and_bundle();
        let trace = vec![sample("R1", 10.0, 0, 5.0), sample("R1", 100.0, 1, 90.0)];

        let report = replay.replay(&bundle, &trace);
        assert_eq!(report.samples, 2);
        assert_eq!(report.misses, 0);
        assert_eq!(report.trace_time, 95.0);
        assert_eq!(report.model_time, 52.0);
        assert_eq!(report.best_time, 52.0);
        assert_eq!(report.default_time, 55.0);
        assert_eq!(report.policy_counts[&0], 1);
        assert_eq!(report.policy_counts[&1], 1);
        assert!(report.speedup().unwrap() > 1.0);
    }

    #[test]
    fn test_unknown_vector_is_extrapolated() {
        let (replay, bundle) = replay_and_bundle();
        // 1000 elements takes the large branch, policy 0, rate 0.5
        let trace = vec![sample("R1", 1000.0, 0, 400.0), sample("R9", 4.0, 0, 3.0)];

        let report = replay.replay(&bundle, &trace);
        assert_eq!(report.misses, 2);
        assert_eq!(report.regions["R1"].model_time, 500.0);
        // unknown region takes the fallback policy 0
        assert_eq!(report.regions["R9"].model_time, 2.0);
        assert_eq!(report.regions["R9"].misses, 1);
    }

    fn lookup_misses_total() -> f64 {
        prometheus::gather()
            .iter()
            .find(|f| f.get_name() == "region_tuner_lookup_misses_total")
            .map(|f| f.get_metric()[0].get_counter().get_value())
            .unwrap_or(0.0)
    }

    #[test]
    fn test_misses_feed_lookup_counter() {
        let (replay, bundle) = replay_and_bundle();
        let replay = replay.with_logger(StructuredLogger::new("replay-test"));
        let trace = vec![sample("R9", 4.0, 0, 3.0), sample("R9", 8.0, 0, 6.0)];

        let before = lookup_misses_total();
        let report = replay.replay(&bundle, &trace);

        assert_eq!(report.misses, 2);
        // the counter is process-global; other tests only add to it
        assert!(lookup_misses_total() >= before + 2.0);
    }

    #[test]
    fn test_missing_element_count_uses_recorded_time() {
        let (replay, bundle) = replay_and_bundle();
        let trace = vec![TelemetrySample::new("R1", 0, 8.0)];

        let report = replay.replay(&bundle, &trace);
        assert_eq!(report.misses, 1);
        assert_eq!(report.model_time, 8.0);
    }
}
