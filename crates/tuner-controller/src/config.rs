//! Controller configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tuner_lib::control::{
    CodegenSettings, ControlConfig, RepublishPolicy, TelemetryWindow,
};
use tuner_lib::codegen::DecisionKind;
use tuner_lib::publish::{DirectoryChannelConfig, DEFAULT_CHANNEL};
use tuner_lib::telemetry::{AggregatorConfig, DEFAULT_DROP_FIELDS};
use tuner_lib::trainer::TrainerConfig;

/// Controller configuration, read from `TUNER_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Instance name attached to structured log events
    #[serde(default = "default_instance")]
    pub instance: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Newline-delimited JSON telemetry file
    #[serde(default = "default_telemetry_path")]
    pub telemetry_path: PathBuf,

    /// Root directory of the bundle channel
    #[serde(default = "default_publish_dir")]
    pub publish_dir: PathBuf,

    #[serde(default = "default_versions_to_keep")]
    pub versions_to_keep: usize,

    #[serde(default = "default_channel")]
    pub channel: String,

    #[serde(default = "default_frame_interval")]
    pub frame_interval: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub run_once: bool,

    /// `cumulative` or `delta`
    #[serde(default = "default_window")]
    pub window: String,

    /// `suppress_unchanged` or `always`
    #[serde(default = "default_republish")]
    pub republish: String,

    /// Comma-separated attribute names excluded from features
    #[serde(default = "default_drop_fields")]
    pub drop_fields: String,

    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,

    #[serde(default = "default_min_rows")]
    pub min_rows: usize,

    /// Directory for per-step bundle and code artifacts
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,

    /// Decision kind for emitted code; no code is emitted when unset
    #[serde(default)]
    pub codegen_kind: Option<String>,

    /// Comma-separated class names, indexed by policy
    #[serde(default)]
    pub class_names: Option<String>,

    /// Comma-separated features read from instruction counts
    #[serde(default)]
    pub derived_features: Option<String>,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "tuner".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_telemetry_path() -> PathBuf {
    PathBuf::from("/var/lib/tuner/telemetry.jsonl")
}

fn default_publish_dir() -> PathBuf {
    PathBuf::from("/var/lib/tuner/bundles")
}

fn default_versions_to_keep() -> usize {
    5
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_frame_interval() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_window() -> String {
    "cumulative".to_string()
}

fn default_republish() -> String {
    "suppress_unchanged".to_string()
}

fn default_drop_fields() -> String {
    DEFAULT_DROP_FIELDS.join(",")
}

fn default_max_depth() -> usize {
    3
}

fn default_min_samples_leaf() -> usize {
    1
}

fn default_min_rows() -> usize {
    2
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl ControllerConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("TUNER").try_parsing(true))
            .build()
            .context("Failed to read controller configuration")?;

        Self::from_config(config)
    }

    pub fn from_config(config: config::Config) -> Result<Self> {
        config
            .try_deserialize()
            .context("Invalid controller configuration")
    }

    /// Library-side loop configuration
    pub fn control_config(&self) -> Result<ControlConfig> {
        let window: TelemetryWindow = self.window.parse().map_err(anyhow::Error::msg)?;
        let republish: RepublishPolicy = self.republish.parse().map_err(anyhow::Error::msg)?;

        let codegen = match &self.codegen_kind {
            Some(kind) => {
                let kind: DecisionKind = kind.parse().map_err(anyhow::Error::msg)?;
                let class_names = self
                    .class_names
                    .as_deref()
                    .map(split_list)
                    .unwrap_or_default();
                if class_names.is_empty() {
                    anyhow::bail!("TUNER_CLASS_NAMES is required when TUNER_CODEGEN_KIND is set");
                }
                Some(CodegenSettings {
                    kind,
                    class_names,
                    derived: self
                        .derived_features
                        .as_deref()
                        .map(split_list)
                        .unwrap_or_default()
                        .into_iter()
                        .collect(),
                })
            }
            None => None,
        };

        Ok(ControlConfig {
            frame_interval: self.frame_interval,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            run_once: self.run_once,
            window,
            republish,
            channel: self.channel.clone(),
            aggregator: AggregatorConfig {
                drop_fields: split_list(&self.drop_fields),
            },
            trainer: TrainerConfig {
                max_depth: self.max_depth,
                min_samples_leaf: self.min_samples_leaf,
                min_rows: self.min_rows,
            },
            codegen,
            artifact_dir: self.artifact_dir.clone(),
        })
    }

    pub fn directory_channel(&self) -> DirectoryChannelConfig {
        DirectoryChannelConfig {
            dir: self.publish_dir.clone(),
            versions_to_keep: self.versions_to_keep,
            ..Default::default()
        }
    }
}
