//! Trace replay command

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;
use tuner_lib::observability::StructuredLogger;
use tuner_lib::simulate::{ReplayReport, TraceReplay};
use tuner_lib::telemetry::{AggregatorConfig, JsonLinesSource, TelemetrySource};

use super::{load_bundle, CommandError};
use crate::output::{color_speedup, format_seconds, print_table, print_warning, OutputFormat};

/// Row for the per-region replay table
#[derive(Tabled, Serialize)]
struct RegionReplayRow {
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Samples")]
    samples: usize,
    #[tabled(rename = "Trace")]
    trace_time: String,
    #[tabled(rename = "Model")]
    model_time: String,
    #[tabled(rename = "Misses")]
    misses: u64,
}

#[derive(Serialize)]
struct ReplaySummary {
    samples: usize,
    trace_time: f64,
    model_time: f64,
    best_time: f64,
    default_time: f64,
    misses: u64,
    speedup: Option<f64>,
    policy_counts: std::collections::BTreeMap<u32, u64>,
}

impl From<&ReplayReport> for ReplaySummary {
    fn from(report: &ReplayReport) -> Self {
        Self {
            samples: report.samples,
            trace_time: report.trace_time,
            model_time: report.model_time,
            best_time: report.best_time,
            default_time: report.default_time,
            misses: report.misses,
            speedup: report.speedup(),
            policy_counts: report.policy_counts.clone(),
        }
    }
}

/// Replay `telemetry` against `bundle` using lookup tables from the same trace
pub async fn replay(
    bundle: &Path,
    telemetry: &Path,
    element_feature: &str,
    format: OutputFormat,
) -> Result<()> {
    let bundle = load_bundle(bundle)?;
    let samples = JsonLinesSource::new(telemetry).fetch(None).await?;
    if samples.is_empty() {
        return Err(CommandError::EmptyTelemetry(telemetry.display().to_string()).into());
    }

    let replay = TraceReplay::from_samples(&samples, AggregatorConfig::default(), element_feature)
        .with_logger(StructuredLogger::new("tunectl"));
    let report = replay.replay(&bundle, &samples);

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&ReplaySummary::from(&report))?);
        }
        OutputFormat::Table => {
            println!("{}", "Trace Replay".bold());
            println!("{}", "=".repeat(50));
            println!("Samples:     {}", report.samples);
            println!("Trace:       {}", format_seconds(report.trace_time));
            println!("Model:       {}", format_seconds(report.model_time));
            println!("Best:        {}", format_seconds(report.best_time));
            println!("Default:     {}", format_seconds(report.default_time));
            if let Some(speedup) = report.speedup() {
                println!("Speedup:     {}", color_speedup(speedup));
            }
            println!();

            let rows: Vec<RegionReplayRow> = report
                .regions
                .iter()
                .map(|(region, r)| RegionReplayRow {
                    region: region.clone(),
                    samples: r.samples,
                    trace_time: format_seconds(r.trace_time),
                    model_time: format_seconds(r.model_time),
                    misses: r.misses,
                })
                .collect();
            print_table(&rows, format)?;
        }
    }

    if report.misses > 0 {
        print_warning(&format!(
            "{} of {} decisions had no measurement and were extrapolated",
            report.misses, report.samples
        ));
    }

    Ok(())
}
