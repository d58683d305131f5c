//! Region model trainer
//!
//! Splits aggregated rows by region, labels each distinct feature vector
//! with its fastest policy, and fits one tree per region. Regions with too
//! few rows, and regions whose fit fails, are reported and left for the
//! fallback rule.

use super::cart::{CartConfig, GiniTreeInducer};
use super::tree::TrainedTree;
use super::TreeInducer;
use crate::models::AggregatedRow;
use crate::telemetry::feature_key;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Trainer hyperparameters
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// Maximum tree depth (default: 3)
    pub max_depth: usize,
    /// Minimum samples per leaf (default: 1)
    pub min_samples_leaf: usize,
    /// Regions with fewer aggregated rows are skipped (default: 2)
    pub min_rows: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            min_samples_leaf: 1,
            min_rows: 2,
        }
    }
}

/// A trained tree and its diagnostics for one region
#[derive(Debug, Clone)]
pub struct RegionModel {
    pub region_name: String,
    pub tree: TrainedTree,
    /// Training matrix rows
    pub rows: usize,
    /// Training matrix columns
    pub cols: usize,
    /// Minimum element count before the model is consulted; -1 disables it
    pub least: i64,
}

impl RegionModel {
    /// Training-set shape rendered as a tuple, e.g. `(2, 1)`
    pub fn shape(&self) -> String {
        format!("({}, {})", self.rows, self.cols)
    }
}

/// Everything one training pass produced
#[derive(Debug, Clone, Default)]
pub struct TrainingOutcome {
    /// Feature schema shared by every trained region; empty when none trained
    pub feature_names: Vec<String>,
    pub models: BTreeMap<String, RegionModel>,
    /// Regions below the row minimum
    pub skipped: Vec<String>,
    /// Regions whose fit failed, with the reason
    pub failed: Vec<(String, String)>,
}

impl TrainingOutcome {
    /// Regions left to the fallback rule this cycle
    pub fn coverage_gaps(&self) -> usize {
        self.skipped.len() + self.failed.len()
    }
}

/// Trains one decision tree per region
#[derive(Clone)]
pub struct RegionModelTrainer {
    config: TrainerConfig,
    inducer: Arc<dyn TreeInducer>,
}

impl RegionModelTrainer {
    /// Create a trainer backed by the built-in gini inducer
    pub fn new(config: TrainerConfig) -> Self {
        let inducer = GiniTreeInducer::new(CartConfig {
            max_depth: config.max_depth,
            min_samples_leaf: config.min_samples_leaf,
            ..Default::default()
        });
        Self::with_inducer(config, Arc::new(inducer))
    }

    /// Create a trainer with a custom inducer
    pub fn with_inducer(config: TrainerConfig, inducer: Arc<dyn TreeInducer>) -> Self {
        Self { config, inducer }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Train every region present in `rows`
    pub fn train(&self, rows: &[AggregatedRow]) -> TrainingOutcome {
        let schema = feature_schema(rows);

        let mut by_region: BTreeMap<&str, Vec<&AggregatedRow>> = BTreeMap::new();
        for row in rows {
            by_region.entry(row.region_name.as_str()).or_default().push(row);
        }

        let mut outcome = TrainingOutcome::default();

        for (region, region_rows) in by_region {
            if region_rows.len() < self.config.min_rows {
                debug!(
                    region = %region,
                    rows = region_rows.len(),
                    min_rows = self.config.min_rows,
                    "Skipping region with too few rows"
                );
                outcome.skipped.push(region.to_string());
                continue;
            }

            let (x, y) = training_set(&region_rows, &schema);
            if x.is_empty() {
                debug!(region = %region, "No complete feature rows for region");
                outcome.skipped.push(region.to_string());
                continue;
            }

            let start = Instant::now();
            match self.inducer.fit(&x, &y) {
                Ok(tree) => {
                    debug!(
                        region = %region,
                        rows = x.len(),
                        cols = schema.len(),
                        nodes = tree.len(),
                        elapsed_ms = start.elapsed().as_millis(),
                        "Trained region model"
                    );
                    outcome.models.insert(
                        region.to_string(),
                        RegionModel {
                            region_name: region.to_string(),
                            tree,
                            rows: x.len(),
                            cols: schema.len(),
                            least: -1,
                        },
                    );
                }
                Err(e) => {
                    warn!(region = %region, error = %e, "Failed to train region model");
                    outcome.failed.push((region.to_string(), e.to_string()));
                }
            }
        }

        if !outcome.models.is_empty() {
            outcome.feature_names = schema;
        }

        info!(
            trained = outcome.models.len(),
            skipped = outcome.skipped.len(),
            failed = outcome.failed.len(),
            "Training pass complete"
        );

        outcome
    }
}

/// Sorted union of feature names across all rows
fn feature_schema(rows: &[AggregatedRow]) -> Vec<String> {
    rows.iter()
        .flat_map(|row| row.features.keys().cloned())
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}

/// Dense matrix of distinct feature vectors labelled with their fastest policy
///
/// Rows missing a schema feature are dropped. When several policies tie on
/// time the first row seen wins.
fn training_set(rows: &[&AggregatedRow], schema: &[String]) -> (Vec<Vec<f64>>, Vec<u32>) {
    let mut winners: BTreeMap<Vec<(String, u64)>, (Vec<f64>, u32, f64)> = BTreeMap::new();

    for row in rows {
        let Some(dense) = schema
            .iter()
            .map(|name| row.features.get(name).copied())
            .collect::<Option<Vec<f64>>>()
        else {
            continue;
        };

        let key = feature_key(&row.features);
        match winners.get_mut(&key) {
            Some(entry) => {
                if row.time_avg < entry.2 {
                    entry.1 = row.policy_index;
                    entry.2 = row.time_avg;
                }
            }
            None => {
                winners.insert(key, (dense, row.policy_index, row.time_avg));
            }
        }
    }

    winners
        .into_values()
        .map(|(dense, policy, _)| (dense, policy))
        .unzip()
}

impl std::fmt::Debug for RegionModelTrainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionModelTrainer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
