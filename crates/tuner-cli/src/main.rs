//! Region tuning CLI
//!
//! Offline driver for building, inspecting and exercising rule bundles
//! without running the controller.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{bundle, codegen, replay};
use std::path::PathBuf;
use tuner_lib::bundle::BaselineKind;
use tuner_lib::codegen::DecisionKind;
use tuner_lib::simulate::DEFAULT_ELEMENT_FEATURE;

/// Region tuning CLI
#[derive(Parser)]
#[command(name = "tunectl")]
#[command(author, version, about = "CLI for region tuning bundles", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a bundle from a telemetry file
    Build {
        /// Newline-delimited JSON telemetry samples
        #[arg(long, env = "TUNER_TELEMETRY_PATH")]
        telemetry: PathBuf,

        /// Maximum tree depth
        #[arg(long, env = "TUNER_MAX_DEPTH", default_value_t = 3)]
        max_depth: usize,

        /// Minimum samples per leaf
        #[arg(long, default_value_t = 1)]
        min_samples_leaf: usize,

        /// Regions with fewer aggregated rows get the fallback rule
        #[arg(long, default_value_t = 2)]
        min_rows: usize,

        /// Bundle guid (defaults to the current time in microseconds)
        #[arg(long)]
        guid: Option<u64>,

        /// Write the bundle here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Write an exploration bundle with a fixed strategy per region
    Baseline {
        /// static, round-robin or random
        #[arg(long)]
        kind: BaselineKind,

        /// Region to include (repeatable)
        #[arg(long = "region", required = true)]
        regions: Vec<String>,

        #[arg(long)]
        guid: Option<u64>,

        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Emit decision code for one region of a bundle
    Codegen {
        #[arg(long)]
        bundle: PathBuf,

        #[arg(long)]
        region: String,

        /// policy, chunk, thread or dynamic
        #[arg(long, default_value = "policy")]
        kind: DecisionKind,

        /// Class names indexed by policy, comma-separated
        #[arg(long, value_delimiter = ',', required = true)]
        classes: Vec<String>,

        /// Features read from instruction counts, comma-separated
        #[arg(long, value_delimiter = ',')]
        derived: Vec<String>,

        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Summarise a bundle
    Inspect {
        #[arg(long)]
        bundle: PathBuf,
    },

    /// Replay a telemetry trace against a bundle
    Replay {
        #[arg(long)]
        bundle: PathBuf,

        #[arg(long, env = "TUNER_TELEMETRY_PATH")]
        telemetry: PathBuf,

        /// Feature holding the element count
        #[arg(long, default_value = DEFAULT_ELEMENT_FEATURE)]
        element_feature: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            telemetry,
            max_depth,
            min_samples_leaf,
            min_rows,
            guid,
            output,
        } => {
            let params = bundle::BuildParams {
                max_depth,
                min_samples_leaf,
                min_rows,
                guid,
            };
            bundle::build(&telemetry, params, output.as_deref()).await?;
        }
        Commands::Baseline {
            kind,
            regions,
            guid,
            output,
        } => {
            bundle::baseline(kind, &regions, guid, output.as_deref())?;
        }
        Commands::Codegen {
            bundle,
            region,
            kind,
            classes,
            derived,
            output,
        } => {
            codegen::emit(&bundle, &region, kind, classes, derived, output.as_deref())?;
        }
        Commands::Inspect { bundle } => {
            bundle::inspect(&bundle, cli.format)?;
        }
        Commands::Replay {
            bundle,
            telemetry,
            element_feature,
        } => {
            replay::replay(&bundle, &telemetry, &element_feature, cli.format).await?;
        }
    }

    Ok(())
}
