//! Online control loop
//!
//! Waits for the telemetry frame counter to advance, rebuilds the rule
//! bundle from the accumulated samples and hands it to the runtime's
//! trigger channel. The loop owns all cross-cycle state.

mod pipeline;
mod r#loop;

#[cfg(test)]
mod tests;

pub use pipeline::{CycleBuild, Pipeline, StageTimings};
pub use r#loop::{ControlLoop, ControlLoopBuilder};

use crate::bundle::ModelBundle;
use crate::codegen::DecisionKind;
use crate::publish::DEFAULT_CHANNEL;
use crate::telemetry::AggregatorConfig;
use crate::trainer::TrainerConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which samples each cycle trains on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryWindow {
    /// Every sample seen since process start
    #[default]
    Cumulative,
    /// Only samples newer than the previous cycle
    Delta,
}

impl FromStr for TelemetryWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cumulative" => Ok(Self::Cumulative),
            "delta" => Ok(Self::Delta),
            other => Err(format!("Unknown telemetry window: {}", other)),
        }
    }
}

/// What to do with a bundle identical to the last one sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepublishPolicy {
    #[default]
    SuppressUnchanged,
    Always,
}

impl FromStr for RepublishPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "suppress_unchanged" | "suppress" => Ok(Self::SuppressUnchanged),
            "always" => Ok(Self::Always),
            other => Err(format!("Unknown republish policy: {}", other)),
        }
    }
}

/// Decision code written next to each cycle's bundle
#[derive(Debug, Clone)]
pub struct CodegenSettings {
    pub kind: DecisionKind,
    /// Class names indexed by policy index
    pub class_names: Vec<String>,
    /// Features read from the instruction-count map
    pub derived: BTreeSet<String>,
}

/// Configuration for the control loop
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Frames the counter must advance before a new cycle (default: 1000)
    pub frame_interval: u64,
    /// Sleep between frame counter checks (default: 1 second)
    pub poll_interval: Duration,
    /// Stop after the first published cycle
    pub run_once: bool,
    pub window: TelemetryWindow,
    pub republish: RepublishPolicy,
    /// Trigger channel name (default: APOLLO_MODELS)
    pub channel: String,
    pub aggregator: AggregatorConfig,
    pub trainer: TrainerConfig,
    pub codegen: Option<CodegenSettings>,
    /// Directory receiving `step.<n>.*` artifacts
    pub artifact_dir: Option<PathBuf>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            frame_interval: 1000,
            poll_interval: Duration::from_secs(1),
            run_once: false,
            window: TelemetryWindow::default(),
            republish: RepublishPolicy::default(),
            channel: DEFAULT_CHANNEL.to_string(),
            aggregator: AggregatorConfig::default(),
            trainer: TrainerConfig::default(),
            codegen: None,
            artifact_dir: None,
        }
    }
}

/// Cross-cycle state owned by the loop
#[derive(Debug, Clone, Default)]
pub struct ControlLoopState {
    /// Frame counter value that triggered the last cycle
    pub watermark: u64,
    /// Completed cycles
    pub step: u64,
    /// Highest sample frame consumed, for delta windows
    pub consumed: Option<u64>,
    pub last_published: Option<ModelBundle>,
}

/// Result of one control cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub step: u64,
    pub guid: u64,
    pub published: bool,
    pub regions_trained: usize,
    /// Observed regions served only by the fallback rule
    pub coverage_gaps: Vec<String>,
}

/// Totals returned when the loop exits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub published: u64,
    pub suppressed: u64,
    pub watermark: u64,
    pub last_guid: Option<u64>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cycles, {} published, {} suppressed, watermark {}",
            self.cycles, self.published, self.suppressed, self.watermark
        )
    }
}
