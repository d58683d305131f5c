//! Versioned model bundles exchanged with the runtime
//!
//! A bundle carries every region's decision rule, the feature schema the
//! rules read, and per-region diagnostics. Field names are part of the
//! wire contract.

mod baseline;
mod guid;

pub use baseline::BaselineKind;
pub use guid::GuidGenerator;

use crate::error::{Result, TunerError};
use crate::models::FALLBACK_REGION;
use crate::rules::{RegionRule, SerializedRules, FALLBACK_POLICY};
use crate::trainer::RegionModel;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Shape string reported for regions without a training set
pub const EMPTY_SHAPE: &str = "(0, 0)";

/// How a region's rule was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionType {
    DecisionTree,
    Static,
    RoundRobin,
    Random,
}

/// Per-region rules and evaluation flags
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Driver {
    pub rules: BTreeMap<String, RegionRule>,
    pub least: BTreeMap<String, i64>,
    pub timed: BTreeMap<String, bool>,
}

/// Ordered feature names the rules read
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub count: usize,
    pub names: Vec<String>,
}

impl FeatureSchema {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            count: names.len(),
            names,
        }
    }
}

/// The self-describing container handed to the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub guid: u64,
    pub driver: Driver,
    pub region_names: Vec<String>,
    pub region_sizes: BTreeMap<String, String>,
    pub region_types: BTreeMap<String, RegionType>,
    pub features: FeatureSchema,
}

impl ModelBundle {
    /// Assemble a bundle from one cycle's serialized rules
    ///
    /// `region_names` lists every region observed in telemetry; regions
    /// without a rule are still named so the runtime knows them.
    pub fn assemble(
        guid: u64,
        region_names: &[String],
        feature_names: Vec<String>,
        rules: SerializedRules,
        models: &BTreeMap<String, RegionModel>,
    ) -> Self {
        let mut bundle = Self::empty(guid, region_names, FeatureSchema::new(feature_names));

        for (region, rule) in rules.rules {
            if region == FALLBACK_REGION {
                continue;
            }
            let (least, shape) = models
                .get(&region)
                .map(|m| (m.least, m.shape()))
                .unwrap_or((-1, EMPTY_SHAPE.to_string()));

            if !bundle.region_names.contains(&region) {
                let at = bundle.region_names.len() - 1;
                bundle.region_names.insert(at, region.clone());
            }
            bundle.driver.least.insert(region.clone(), least);
            bundle.driver.timed.insert(region.clone(), true);
            bundle.region_sizes.insert(region.clone(), shape);
            bundle.region_types.insert(region.clone(), RegionType::DecisionTree);
            bundle.driver.rules.insert(region, rule);
        }

        bundle
    }

    /// Bundle naming `region_names` with only the fallback rule set
    fn empty(guid: u64, region_names: &[String], features: FeatureSchema) -> Self {
        let mut seen = BTreeSet::new();
        let mut names: Vec<String> = region_names
            .iter()
            .filter(|n| n.as_str() != FALLBACK_REGION && seen.insert(n.as_str()))
            .cloned()
            .collect();
        names.push(FALLBACK_REGION.to_string());

        let mut bundle = Self {
            guid,
            driver: Driver::default(),
            region_names: names,
            region_sizes: BTreeMap::new(),
            region_types: BTreeMap::new(),
            features,
        };
        bundle.set_fallback();
        bundle
    }

    fn set_fallback(&mut self) {
        let name = FALLBACK_REGION.to_string();
        self.driver
            .rules
            .insert(name.clone(), RegionRule::constant(FALLBACK_POLICY));
        self.driver.least.insert(name.clone(), -1);
        self.driver.timed.insert(name.clone(), true);
        self.region_sizes.insert(name.clone(), EMPTY_SHAPE.to_string());
        self.region_types.insert(name, RegionType::Static);
    }

    /// Regions holding a learned tree
    pub fn trained_regions(&self) -> Vec<&str> {
        self.driver
            .rules
            .iter()
            .filter(|(_, rule)| rule.as_tree().is_some())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Rule the runtime would apply to `region`
    pub fn rule_for(&self, region: &str) -> Option<&RegionRule> {
        self.driver
            .rules
            .get(region)
            .or_else(|| self.driver.rules.get(FALLBACK_REGION))
    }

    /// Policy the runtime would pick for `region` given `features`
    pub fn decide(&self, region: &str, features: &BTreeMap<String, f64>) -> Option<u32> {
        self.rule_for(region)?.decide(features)
    }

    /// Equal in every field except the guid
    pub fn same_contents(&self, other: &ModelBundle) -> bool {
        self.driver == other.driver
            && self.region_names == other.region_names
            && self.region_sizes == other.region_sizes
            && self.region_types == other.region_types
            && self.features == other.features
    }

    /// Check the invariants every published bundle satisfies
    pub fn validate(&self) -> Result<()> {
        if self.features.count != self.features.names.len() {
            return Err(TunerError::malformed(format!(
                "feature count {} does not match {} names",
                self.features.count,
                self.features.names.len()
            )));
        }
        if !self.region_names.iter().any(|n| n == FALLBACK_REGION)
            || !self.driver.rules.contains_key(FALLBACK_REGION)
            || !self.driver.least.contains_key(FALLBACK_REGION)
            || !self.driver.timed.contains_key(FALLBACK_REGION)
        {
            return Err(TunerError::malformed("bundle has no fallback region"));
        }
        for (region, rule) in &self.driver.rules {
            if let Some(tree) = rule.as_tree() {
                for split in tree.rules() {
                    if !self.features.names.iter().any(|n| n == split.feature()) {
                        return Err(TunerError::UnknownFeature(format!(
                            "{} (region {})",
                            split.feature(),
                            region
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Wire text: JSON with 4-space indentation and a trailing newline
    pub fn to_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        buf.push(b'\n');
        String::from_utf8(buf).map_err(|e| TunerError::Publish(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
