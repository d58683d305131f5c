//! Telemetry aggregation
//!
//! Reduces raw samples to one row per (region, feature vector, policy)
//! holding the fastest observed time. Housekeeping columns named in the
//! drop-list are removed before grouping.

use crate::models::{AggregatedRow, TelemetrySample};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Columns that never carry learning signal
pub const DEFAULT_DROP_FIELDS: &[&str] = &[
    "region_name",
    "region_name_id",
    "policy_index",
    "mpi_rank",
    "step",
    "exec_count",
    "frame",
    "time_last",
    "time_min",
    "time_max",
    "time_avg",
];

/// Configuration for the aggregator
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Attribute names removed before grouping
    pub drop_fields: Vec<String>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            drop_fields: DEFAULT_DROP_FIELDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

type FeatureKey = Vec<(String, u64)>;
type GroupKey = (String, FeatureKey, u32);

/// Groups samples and keeps the minimum time per key
#[derive(Debug, Clone)]
pub struct TelemetryAggregator {
    drop_fields: BTreeSet<String>,
}

impl Default for TelemetryAggregator {
    fn default() -> Self {
        Self::new(AggregatorConfig::default())
    }
}

impl TelemetryAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            drop_fields: config.drop_fields.into_iter().collect(),
        }
    }

    /// Whether an attribute survives the drop-list
    pub fn is_feature(&self, name: &str) -> bool {
        !self.drop_fields.contains(name)
    }

    /// Aggregate samples into rows ordered by (region, features, policy)
    ///
    /// Ties on time keep the row observed first. The output order does not
    /// depend on input order.
    pub fn aggregate(&self, samples: &[TelemetrySample]) -> Vec<AggregatedRow> {
        let mut groups: BTreeMap<GroupKey, AggregatedRow> = BTreeMap::new();

        for sample in samples {
            let features: BTreeMap<String, f64> = sample
                .attributes
                .iter()
                .filter(|(name, _)| self.is_feature(name))
                .map(|(name, value)| (name.clone(), canonical(*value)))
                .collect();

            let key = (
                sample.region_name.clone(),
                feature_key(&features),
                sample.policy_index,
            );

            match groups.get_mut(&key) {
                Some(row) => {
                    if is_faster(sample.time_avg, row.time_avg) {
                        row.time_avg = sample.time_avg;
                    }
                }
                None => {
                    groups.insert(
                        key,
                        AggregatedRow {
                            region_name: sample.region_name.clone(),
                            features,
                            policy_index: sample.policy_index,
                            time_avg: sample.time_avg,
                        },
                    );
                }
            }
        }

        debug!(
            samples = samples.len(),
            rows = groups.len(),
            "Aggregated telemetry"
        );

        groups.into_values().collect()
    }
}

/// Bit-exact identity of a feature vector
pub(crate) fn feature_key(features: &BTreeMap<String, f64>) -> FeatureKey {
    features
        .iter()
        .map(|(name, value)| (name.clone(), canonical(*value).to_bits()))
        .collect()
}

fn canonical(value: f64) -> f64 {
    if value == 0.0 {
        0.0
    } else if value.is_nan() {
        f64::NAN
    } else {
        value
    }
}

fn is_faster(candidate: f64, current: f64) -> bool {
    candidate < current || (current.is_nan() && !candidate.is_nan())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(region: &str, size: f64, policy: u32, time: f64) -> TelemetrySample {
        TelemetrySample::new(region, policy, time)
            .with_attribute("size", size)
            .with_attribute("mpi_rank", 0.0)
            .with_attribute("exec_count", 3.0)
    }

    #[test]
    fn test_keeps_minimum_time_per_key() {
        let aggregator = TelemetryAggregator::default();
        let rows = aggregator.aggregate(&[
            sample("R1", 10.0, 0, 5.0),
            sample("R1", 10.0, 0, 3.0),
            sample("R1", 10.0, 0, 4.0),
            sample("R1", 10.0, 1, 2.0),
        ]);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].policy_index, 0);
        assert_eq!(rows[0].time_avg, 3.0);
        assert_eq!(rows[1].policy_index, 1);
        assert_eq!(rows[1].time_avg, 2.0);
    }

    #[test]
    fn test_drops_housekeeping_columns() {
        let aggregator = TelemetryAggregator::default();
        let rows = aggregator.aggregate(&[sample("R1", 10.0, 0, 5.0)]);

        let names: Vec<&str> = rows[0].features.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["size"]);
    }

    #[test]
    fn test_drop_list_is_configurable() {
        let aggregator = TelemetryAggregator::new(AggregatorConfig {
            drop_fields: vec!["size".to_string()],
        });
        let rows = aggregator.aggregate(&[sample("R1", 10.0, 0, 5.0), sample("R1", 20.0, 0, 1.0)]);

        // size is gone, so both samples collapse into one key
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].time_avg, 1.0);
        assert!(rows[0].features.contains_key("mpi_rank"));
    }

    #[test]
    fn test_output_independent_of_input_order() {
        let aggregator = TelemetryAggregator::default();
        let mut samples = vec![
            sample("R2", 1.0, 0, 9.0),
            sample("R1", 10.0, 1, 2.0),
            sample("R1", 100.0, 0, 50.0),
            sample("R1", 10.0, 0, 5.0),
            sample("R1", 10.0, 0, 4.0),
        ];
        let forward = aggregator.aggregate(&samples);
        samples.reverse();
        let backward = aggregator.aggregate(&samples);

        assert_eq!(forward, backward);
    }

    #[test]
    fn test_reaggregation_is_noop() {
        let aggregator = TelemetryAggregator::default();
        let rows = aggregator.aggregate(&[
            sample("R1", 10.0, 0, 5.0),
            sample("R1", 10.0, 0, 1.5),
            sample("R1", 100.0, 1, 7.0),
        ]);

        let again: Vec<TelemetrySample> = rows.iter().map(AggregatedRow::to_sample).collect();
        assert_eq!(aggregator.aggregate(&again), rows);
        assert_eq!(aggregator.aggregate(&again), aggregator.aggregate(&again));
    }

    #[test]
    fn test_negative_zero_shares_key() {
        let aggregator = TelemetryAggregator::default();
        let rows = aggregator.aggregate(&[sample("R1", 0.0, 0, 5.0), sample("R1", -0.0, 0, 4.0)]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].time_avg, 4.0);
    }

    #[test]
    fn test_nan_time_replaced_by_real_measurement() {
        let aggregator = TelemetryAggregator::default();
        let rows = aggregator.aggregate(&[sample("R1", 1.0, 0, f64::NAN), sample("R1", 1.0, 0, 4.0)]);
        assert_eq!(rows[0].time_avg, 4.0);
    }

    #[test]
    fn test_empty_input() {
        assert!(TelemetryAggregator::default().aggregate(&[]).is_empty());
    }
}
