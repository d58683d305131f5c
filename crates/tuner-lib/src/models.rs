//! Core data models shared by the tuning pipeline

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sentinel region every bundle carries as the default decision
pub const FALLBACK_REGION: &str = "__ANY_REGION__";

/// Number of class slots in a serialized leaf value vector
pub const LEAF_VALUE_SLOTS: usize = 20;

/// One raw measurement reported by an instrumented application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub region_name: String,
    pub policy_index: u32,
    /// Frame the sample was flushed in
    #[serde(default)]
    pub frame: u64,
    /// Observed execution time in seconds
    pub time_avg: f64,
    /// Every other numeric column of the row, housekeeping included
    #[serde(default)]
    pub attributes: BTreeMap<String, f64>,
}

impl TelemetrySample {
    pub fn new(region_name: impl Into<String>, policy_index: u32, time_avg: f64) -> Self {
        Self {
            region_name: region_name.into(),
            policy_index,
            frame: 0,
            time_avg,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: f64) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_frame(mut self, frame: u64) -> Self {
        self.frame = frame;
        self
    }
}

/// Fastest observed time for one (region, feature vector, policy)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRow {
    pub region_name: String,
    pub features: BTreeMap<String, f64>,
    pub policy_index: u32,
    pub time_avg: f64,
}

impl AggregatedRow {
    /// Treat the row as a single raw sample again
    pub fn to_sample(&self) -> TelemetrySample {
        TelemetrySample {
            region_name: self.region_name.clone(),
            policy_index: self.policy_index,
            frame: 0,
            time_avg: self.time_avg,
            attributes: self.features.clone(),
        }
    }
}
