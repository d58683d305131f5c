//! Subcommand implementations

pub mod bundle;
pub mod codegen;
pub mod replay;

use anyhow::{Context, Result};
use std::path::Path;
use thiserror::Error;
use tuner_lib::bundle::ModelBundle;

/// Failures specific to CLI input
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("region '{0}' is not in the bundle")]
    UnknownRegion(String),

    #[error("region '{region}' has a constant rule \"{rule}\" and no tree")]
    NoTree { region: String, rule: String },

    #[error("no telemetry samples in {0}")]
    EmptyTelemetry(String),
}

/// Read and validate a bundle file
pub fn load_bundle(path: &Path) -> Result<ModelBundle> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read bundle {}", path.display()))?;
    let bundle = ModelBundle::from_json(&text)
        .with_context(|| format!("Failed to parse bundle {}", path.display()))?;
    bundle.validate()?;
    Ok(bundle)
}
