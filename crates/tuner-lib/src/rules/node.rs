//! Portable rule-tree nodes
//!
//! Leaf JSON:  `{"id", "criterion", "impurity", "samples", "value", "class"}`
//! Split JSON: `{"id", "rule", "<criterion>": impurity, "samples", "left", "right"}`

use crate::error::{Result, TunerError};
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Condition held by an internal node
#[derive(Debug, Clone, PartialEq)]
pub enum SplitRule {
    /// `feature <= threshold`, threshold kept at 4 decimal places
    LessOrEqual { feature: String, threshold: f64 },
    /// `feature = false`, used for one-hot categorical columns
    EqualsFalse { feature: String },
}

impl SplitRule {
    /// Rule for a split on `feature` at `threshold`
    ///
    /// Feature names carrying an equality marker become `= false` tests.
    pub fn for_split(feature: &str, threshold: f64) -> Self {
        if feature.contains('=') {
            SplitRule::EqualsFalse {
                feature: feature.to_string(),
            }
        } else {
            SplitRule::LessOrEqual {
                feature: feature.to_string(),
                threshold: round4(threshold),
            }
        }
    }

    pub fn feature(&self) -> &str {
        match self {
            SplitRule::LessOrEqual { feature, .. } | SplitRule::EqualsFalse { feature } => feature,
        }
    }

    /// Whether a row with `value` for the rule's feature goes left
    pub fn goes_left(&self, value: f64) -> bool {
        match self {
            SplitRule::LessOrEqual { threshold, .. } => value <= *threshold,
            SplitRule::EqualsFalse { .. } => value == 0.0,
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        if let Some(feature) = text.strip_suffix(" = false") {
            return Ok(SplitRule::EqualsFalse {
                feature: feature.to_string(),
            });
        }
        let (feature, threshold) = text
            .rsplit_once(" <= ")
            .ok_or_else(|| TunerError::malformed(format!("unrecognised rule '{}'", text)))?;
        let threshold = threshold
            .trim()
            .parse::<f64>()
            .map_err(|_| TunerError::malformed(format!("bad threshold in rule '{}'", text)))?;
        Ok(SplitRule::LessOrEqual {
            feature: feature.to_string(),
            threshold,
        })
    }
}

impl fmt::Display for SplitRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitRule::LessOrEqual { feature, threshold } => {
                write!(f, "{} <= {:.4}", feature, threshold)
            }
            SplitRule::EqualsFalse { feature } => write!(f, "{} = false", feature),
        }
    }
}

fn round4(value: f64) -> f64 {
    format!("{:.4}", value).parse().unwrap_or(value)
}

/// Serialized counterpart of one tree node
#[derive(Debug, Clone, PartialEq)]
pub enum RuleNode {
    Split {
        id: usize,
        rule: SplitRule,
        criterion: String,
        impurity: f64,
        samples: usize,
        left: Box<RuleNode>,
        right: Box<RuleNode>,
    },
    Leaf {
        id: usize,
        criterion: String,
        impurity: f64,
        samples: usize,
        /// Weighted count per policy index
        value: Vec<f64>,
        class: u32,
    },
}

impl RuleNode {
    pub fn id(&self) -> usize {
        match self {
            RuleNode::Split { id, .. } | RuleNode::Leaf { id, .. } => *id,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, RuleNode::Leaf { .. })
    }

    pub fn node_count(&self) -> usize {
        match self {
            RuleNode::Leaf { .. } => 1,
            RuleNode::Split { left, right, .. } => 1 + left.node_count() + right.node_count(),
        }
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            RuleNode::Leaf { .. } => 1,
            RuleNode::Split { left, right, .. } => left.leaf_count() + right.leaf_count(),
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            RuleNode::Leaf { .. } => 0,
            RuleNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    /// Every split rule in pre-order
    pub fn rules(&self) -> Vec<&SplitRule> {
        let mut out = Vec::new();
        fn walk<'a>(node: &'a RuleNode, out: &mut Vec<&'a SplitRule>) {
            if let RuleNode::Split {
                rule, left, right, ..
            } = node
            {
                out.push(rule);
                walk(left, out);
                walk(right, out);
            }
        }
        walk(self, &mut out);
        out
    }

    /// Predicted policy for a feature vector, `None` if a tested feature is absent
    pub fn classify(&self, features: &BTreeMap<String, f64>) -> Option<u32> {
        let mut node = self;
        loop {
            match node {
                RuleNode::Leaf { class, .. } => return Some(*class),
                RuleNode::Split {
                    rule, left, right, ..
                } => {
                    let value = *features.get(rule.feature())?;
                    node = if rule.goes_left(value) { left } else { right };
                }
            }
        }
    }

    /// Decode a node from its JSON form
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| TunerError::malformed("rule node is not an object"))?;
        let id = get_usize(obj, "id")?;
        let samples = get_usize(obj, "samples")?;

        match obj.get("rule") {
            Some(rule) => {
                let rule = rule
                    .as_str()
                    .ok_or_else(|| TunerError::malformed(format!("node {} rule is not text", id)))?;
                let (criterion, impurity) = obj
                    .iter()
                    .find(|(key, _)| !SPLIT_KEYS.contains(&key.as_str()))
                    .ok_or_else(|| {
                        TunerError::malformed(format!("node {} has no impurity entry", id))
                    })?;
                let impurity = impurity.as_f64().ok_or_else(|| {
                    TunerError::malformed(format!("node {} impurity is not numeric", id))
                })?;
                let left = obj
                    .get("left")
                    .ok_or_else(|| TunerError::malformed(format!("node {} has no left child", id)))?;
                let right = obj.get("right").ok_or_else(|| {
                    TunerError::malformed(format!("node {} has no right child", id))
                })?;

                Ok(RuleNode::Split {
                    id,
                    rule: SplitRule::parse(rule)?,
                    criterion: criterion.clone(),
                    impurity,
                    samples,
                    left: Box::new(RuleNode::from_value(left)?),
                    right: Box::new(RuleNode::from_value(right)?),
                })
            }
            None => {
                let criterion = obj
                    .get("criterion")
                    .and_then(Value::as_str)
                    .unwrap_or("impurity")
                    .to_string();
                let impurity = obj.get("impurity").and_then(Value::as_f64).ok_or_else(|| {
                    TunerError::malformed(format!("leaf {} impurity missing", id))
                })?;
                let value = obj
                    .get("value")
                    .and_then(Value::as_array)
                    .ok_or_else(|| TunerError::malformed(format!("leaf {} value missing", id)))?
                    .iter()
                    .map(|v| {
                        v.as_f64().ok_or_else(|| {
                            TunerError::malformed(format!("leaf {} value is not numeric", id))
                        })
                    })
                    .collect::<Result<Vec<f64>>>()?;
                let class = obj
                    .get("class")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| TunerError::malformed(format!("leaf {} class missing", id)))?;

                Ok(RuleNode::Leaf {
                    id,
                    criterion,
                    impurity,
                    samples,
                    value,
                    class: class as u32,
                })
            }
        }
    }
}

const SPLIT_KEYS: &[&str] = &["id", "rule", "samples", "left", "right"];

fn get_usize(obj: &Map<String, Value>, key: &str) -> Result<usize> {
    obj.get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .ok_or_else(|| TunerError::malformed(format!("rule node missing '{}'", key)))
}

impl Serialize for RuleNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            RuleNode::Leaf {
                id,
                criterion,
                impurity,
                samples,
                value,
                class,
            } => {
                let mut map = serializer.serialize_map(Some(6))?;
                map.serialize_entry("id", id)?;
                map.serialize_entry("criterion", criterion)?;
                map.serialize_entry("impurity", impurity)?;
                map.serialize_entry("samples", samples)?;
                map.serialize_entry("value", value)?;
                map.serialize_entry("class", class)?;
                map.end()
            }
            RuleNode::Split {
                id,
                rule,
                criterion,
                impurity,
                samples,
                left,
                right,
            } => {
                let mut map = serializer.serialize_map(Some(6))?;
                map.serialize_entry("id", id)?;
                map.serialize_entry("rule", &rule.to_string())?;
                map.serialize_entry(criterion.as_str(), impurity)?;
                map.serialize_entry("samples", samples)?;
                map.serialize_entry("left", left.as_ref())?;
                map.serialize_entry("right", right.as_ref())?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for RuleNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        RuleNode::from_value(&value).map_err(D::Error::custom)
    }
}

/// Per-region entry of a bundle's rule map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegionRule {
    Tree(RuleNode),
    /// Fixed policy index rendered as text, e.g. `"0"`
    Constant(String),
}

impl RegionRule {
    pub fn constant(policy: u32) -> Self {
        RegionRule::Constant(policy.to_string())
    }

    pub fn as_tree(&self) -> Option<&RuleNode> {
        match self {
            RegionRule::Tree(node) => Some(node),
            RegionRule::Constant(_) => None,
        }
    }

    /// Policy chosen for a feature vector
    pub fn decide(&self, features: &BTreeMap<String, f64>) -> Option<u32> {
        match self {
            RegionRule::Tree(node) => node.classify(features),
            RegionRule::Constant(text) => text.trim().parse().ok(),
        }
    }
}
