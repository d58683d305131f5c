//! Baseline bundles used during exploration phases

use super::{FeatureSchema, ModelBundle, RegionType, EMPTY_SHAPE};
use crate::models::FALLBACK_REGION;
use crate::rules::RegionRule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Constant rule written for every region of a baseline bundle
pub const BASELINE_RULE: &str = "1";

/// Exploration strategy a baseline bundle asks the runtime to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BaselineKind {
    Static,
    RoundRobin,
    Random,
}

impl BaselineKind {
    pub fn region_type(self) -> RegionType {
        match self {
            BaselineKind::Static => RegionType::Static,
            BaselineKind::RoundRobin => RegionType::RoundRobin,
            BaselineKind::Random => RegionType::Random,
        }
    }
}

impl fmt::Display for BaselineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BaselineKind::Static => "static",
            BaselineKind::RoundRobin => "round-robin",
            BaselineKind::Random => "random",
        };
        f.write_str(name)
    }
}

impl FromStr for BaselineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "static" => Ok(BaselineKind::Static),
            "round-robin" | "roundrobin" => Ok(BaselineKind::RoundRobin),
            "random" => Ok(BaselineKind::Random),
            other => Err(format!("unknown baseline kind '{}'", other)),
        }
    }
}

impl ModelBundle {
    /// Feature-free bundle giving every region the same constant rule
    pub fn baseline(guid: u64, kind: BaselineKind, region_names: &[String]) -> Self {
        let mut bundle = Self::empty(guid, region_names, FeatureSchema::default());

        let regions: Vec<String> = bundle
            .region_names
            .iter()
            .filter(|n| n.as_str() != FALLBACK_REGION)
            .cloned()
            .collect();

        for region in regions {
            bundle
                .driver
                .rules
                .insert(region.clone(), RegionRule::Constant(BASELINE_RULE.to_string()));
            bundle.driver.least.insert(region.clone(), -1);
            bundle.driver.timed.insert(region.clone(), true);
            bundle.region_sizes.insert(region.clone(), EMPTY_SHAPE.to_string());
            bundle.region_types.insert(region, kind.region_type());
        }

        bundle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_bundle() {
        let regions = vec!["loop_a".to_string(), "loop_b".to_string()];
        let bundle = ModelBundle::baseline(11, BaselineKind::RoundRobin, &regions);
        bundle.validate().unwrap();

        assert_eq!(bundle.features.count, 0);
        assert!(bundle.features.names.is_empty());
        assert_eq!(bundle.region_names, vec!["loop_a", "loop_b", FALLBACK_REGION]);
        assert_eq!(bundle.driver.rules["loop_a"], RegionRule::Constant("1".to_string()));
        assert_eq!(bundle.region_types["loop_b"], RegionType::RoundRobin);
        assert_eq!(bundle.driver.rules[FALLBACK_REGION], RegionRule::Constant("0".to_string()));
        assert_eq!(bundle.region_types[FALLBACK_REGION], RegionType::Static);
    }

    #[test]
    fn test_baseline_kind_parse() {
        assert_eq!("static".parse::<BaselineKind>().unwrap(), BaselineKind::Static);
        assert_eq!("Round_Robin".parse::<BaselineKind>().unwrap(), BaselineKind::RoundRobin);
        assert_eq!("random".parse::<BaselineKind>().unwrap(), BaselineKind::Random);
        assert!("greedy".parse::<BaselineKind>().is_err());
        assert_eq!(BaselineKind::RoundRobin.to_string(), "round-robin");
    }

    #[test]
    fn test_baseline_without_regions() {
        let bundle = ModelBundle::baseline(1, BaselineKind::Static, &[]);
        assert_eq!(bundle.region_names, vec![FALLBACK_REGION]);
        assert_eq!(bundle.driver.rules.len(), 1);
    }
}
