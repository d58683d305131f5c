//! Bundle build, baseline and inspect commands

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;
use tuner_lib::bundle::{BaselineKind, GuidGenerator, ModelBundle};
use tuner_lib::control::Pipeline;
use tuner_lib::rules::RegionRule;
use tuner_lib::telemetry::{AggregatorConfig, JsonLinesSource, RegionRegistry, TelemetrySource};
use tuner_lib::trainer::TrainerConfig;

use super::{load_bundle, CommandError};
use crate::output::{color_region_type, print_table, print_warning, write_or_print, OutputFormat};

/// Trainer settings taken from the command line
#[derive(Debug, Clone, Copy)]
pub struct BuildParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub min_rows: usize,
    pub guid: Option<u64>,
}

/// Row for the region table
#[derive(Tabled, Serialize)]
struct RegionRow {
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Type")]
    region_type: String,
    #[tabled(rename = "Shape")]
    shape: String,
    #[tabled(rename = "Rule")]
    rule: String,
    #[tabled(rename = "Least")]
    least: i64,
}

#[derive(Serialize)]
struct BundleSummary<'a> {
    guid: u64,
    created: Option<String>,
    features: &'a [String],
    regions: Vec<RegionRow>,
}

fn guid_or_clock(guid: Option<u64>) -> u64 {
    guid.unwrap_or_else(|| GuidGenerator::from_clock().next_guid())
}

/// Train a bundle from every sample in `telemetry`
pub async fn build(telemetry: &Path, params: BuildParams, output: Option<&Path>) -> Result<()> {
    let samples = JsonLinesSource::new(telemetry).fetch(None).await?;
    if samples.is_empty() {
        return Err(CommandError::EmptyTelemetry(telemetry.display().to_string()).into());
    }

    let registry = RegionRegistry::new();
    registry.observe_all(&samples);

    let pipeline = Pipeline::new(
        AggregatorConfig::default(),
        TrainerConfig {
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
            min_rows: params.min_rows,
        },
    );
    let build = pipeline.build(guid_or_clock(params.guid), &registry.names(), &samples);
    build.bundle.validate()?;

    for region in &build.coverage_gaps {
        print_warning(&format!("{} has no trained model, fallback rule applies", region));
    }
    for (region, reason) in build.outcome.failed.iter().chain(&build.serialize_failures) {
        print_warning(&format!("{} failed: {}", region, reason));
    }

    write_or_print(&build.bundle.to_json()?, output)
}

/// Write a baseline bundle for `regions`
pub fn baseline(
    kind: BaselineKind,
    regions: &[String],
    guid: Option<u64>,
    output: Option<&Path>,
) -> Result<()> {
    let bundle = ModelBundle::baseline(guid_or_clock(guid), kind, regions);
    write_or_print(&bundle.to_json()?, output)
}

/// Print a summary of a bundle file
pub fn inspect(path: &Path, format: OutputFormat) -> Result<()> {
    let bundle = load_bundle(path)?;

    let regions: Vec<RegionRow> = bundle
        .region_names
        .iter()
        .map(|name| region_row(&bundle, name))
        .collect();

    // Clock-seeded guids are microseconds since the epoch
    let created = chrono::DateTime::from_timestamp_micros(bundle.guid as i64)
        .filter(|t| t.timestamp() > 0)
        .map(|t| t.to_rfc3339());

    match format {
        OutputFormat::Json => {
            let summary = BundleSummary {
                guid: bundle.guid,
                created,
                features: &bundle.features.names,
                regions,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Table => {
            println!("{}", "Bundle".bold());
            println!("{}", "=".repeat(50));
            println!("Guid:        {}", bundle.guid.to_string().cyan());
            if let Some(created) = &created {
                println!("Created:     {}", created);
            }
            println!(
                "Features:    {} [{}]",
                bundle.features.count,
                bundle.features.names.join(", ")
            );
            println!("Trained:     {}", bundle.trained_regions().len());
            println!();

            let rows: Vec<RegionRow> = regions
                .into_iter()
                .map(|mut row| {
                    row.region_type = color_region_type(&row.region_type);
                    row
                })
                .collect();
            print_table(&rows, format)?;
        }
    }

    Ok(())
}

fn region_row(bundle: &ModelBundle, name: &str) -> RegionRow {
    let rule = match bundle.driver.rules.get(name) {
        Some(RegionRule::Tree(tree)) => format!(
            "tree: {} nodes, {} leaves, depth {}",
            tree.node_count(),
            tree.leaf_count(),
            tree.depth()
        ),
        Some(RegionRule::Constant(policy)) => format!("constant {}", policy),
        None => "fallback".to_string(),
    };

    RegionRow {
        region: name.to_string(),
        region_type: bundle
            .region_types
            .get(name)
            .map(|t| format!("{:?}", t))
            .unwrap_or_else(|| "-".to_string()),
        shape: bundle
            .region_sizes
            .get(name)
            .cloned()
            .unwrap_or_else(|| "-".to_string()),
        rule,
        least: bundle.driver.least.get(name).copied().unwrap_or(-1),
    }
}
