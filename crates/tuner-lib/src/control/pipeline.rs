//! One aggregate-train-serialize-assemble pass

use crate::bundle::ModelBundle;
use crate::models::{AggregatedRow, TelemetrySample, FALLBACK_REGION};
use crate::rules::RuleSerializer;
use crate::telemetry::{AggregatorConfig, TelemetryAggregator};
use crate::trainer::{RegionModelTrainer, TrainerConfig, TrainingOutcome};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// Elapsed time per stage
#[derive(Debug, Clone, Copy, Default)]
pub struct StageTimings {
    pub aggregate: Duration,
    pub train: Duration,
    pub serialize: Duration,
}

/// Everything one pass produced
#[derive(Debug, Clone)]
pub struct CycleBuild {
    pub bundle: ModelBundle,
    pub rows: Vec<AggregatedRow>,
    pub outcome: TrainingOutcome,
    /// Regions whose tree could not be serialized
    pub serialize_failures: Vec<(String, String)>,
    /// Observed regions left to the fallback rule
    pub coverage_gaps: Vec<String>,
    pub timings: StageTimings,
}

/// The model-construction stages, in order
#[derive(Debug, Clone)]
pub struct Pipeline {
    aggregator: TelemetryAggregator,
    trainer: RegionModelTrainer,
    serializer: RuleSerializer,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(AggregatorConfig::default(), TrainerConfig::default())
    }
}

impl Pipeline {
    pub fn new(aggregator: AggregatorConfig, trainer: TrainerConfig) -> Self {
        Self {
            aggregator: TelemetryAggregator::new(aggregator),
            trainer: RegionModelTrainer::new(trainer),
            serializer: RuleSerializer::new(),
        }
    }

    /// Replace the trainer, e.g. to plug in another tree inducer
    pub fn with_trainer(mut self, trainer: RegionModelTrainer) -> Self {
        self.trainer = trainer;
        self
    }

    /// Build a bundle from raw samples
    ///
    /// `region_names` is every region observed so far; regions present in
    /// `samples` are added if missing and the result is sorted.
    pub fn build(&self, guid: u64, region_names: &[String], samples: &[TelemetrySample]) -> CycleBuild {
        let start = Instant::now();
        let rows = self.aggregator.aggregate(samples);
        let aggregate = start.elapsed();

        let start = Instant::now();
        let outcome = self.trainer.train(&rows);
        let train = start.elapsed();

        let start = Instant::now();
        let rules = self.serializer.serialize_all(&outcome.models, &outcome.feature_names);
        let serialize_failures = rules.failed.clone();

        let names: Vec<String> = region_names
            .iter()
            .chain(samples.iter().map(|s| &s.region_name))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .cloned()
            .collect();

        let bundle = ModelBundle::assemble(
            guid,
            &names,
            outcome.feature_names.clone(),
            rules,
            &outcome.models,
        );
        let serialize = start.elapsed();

        let trained = bundle.trained_regions();
        let coverage_gaps = bundle
            .region_names
            .iter()
            .filter(|n| n.as_str() != FALLBACK_REGION && !trained.contains(&n.as_str()))
            .cloned()
            .collect();

        CycleBuild {
            bundle,
            rows,
            outcome,
            serialize_failures,
            coverage_gaps,
            timings: StageTimings {
                aggregate,
                train,
                serialize,
            },
        }
    }
}
