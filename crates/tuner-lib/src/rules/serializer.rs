//! Tree-to-rule serialization

use super::node::{RegionRule, RuleNode, SplitRule};
use crate::error::{Result, TunerError};
use crate::models::{FALLBACK_REGION, LEAF_VALUE_SLOTS};
use crate::trainer::{RegionModel, TrainedTree, TreeNode};
use std::collections::BTreeMap;
use tracing::warn;

/// Policy the fallback region always selects
pub const FALLBACK_POLICY: u32 = 0;

/// Rule map for one cycle plus the regions that failed to serialize
#[derive(Debug, Clone, Default)]
pub struct SerializedRules {
    /// Includes the fallback region
    pub rules: BTreeMap<String, RegionRule>,
    pub failed: Vec<(String, String)>,
}

/// Walks induced trees into portable rule nodes
#[derive(Debug, Clone, Default)]
pub struct RuleSerializer {
    criterion: Option<String>,
}

impl RuleSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the criterion name written on every node
    pub fn with_criterion(criterion: impl Into<String>) -> Self {
        Self {
            criterion: Some(criterion.into()),
        }
    }

    /// Serialize one tree against the feature schema it was trained on
    pub fn serialize_tree(&self, tree: &TrainedTree, feature_names: &[String]) -> Result<RuleNode> {
        let criterion = self
            .criterion
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| match tree.criterion() {
                "" => "impurity".to_string(),
                other => other.to_string(),
            });

        let mut visited = vec![false; tree.len()];
        self.encode(tree, 0, feature_names, &criterion, &mut visited)
    }

    fn encode(
        &self,
        tree: &TrainedTree,
        id: usize,
        feature_names: &[String],
        criterion: &str,
        visited: &mut [bool],
    ) -> Result<RuleNode> {
        let node = tree
            .node(id)
            .ok_or_else(|| TunerError::malformed(format!("missing node {}", id)))?;
        if std::mem::replace(&mut visited[id], true) {
            return Err(TunerError::malformed(format!("node {} is reachable twice", id)));
        }

        match node {
            TreeNode::Leaf {
                value,
                impurity,
                samples,
            } => {
                let slots = reindex(value, tree.classes())?;
                let class = tree
                    .leaf_class(value)
                    .ok_or_else(|| TunerError::malformed(format!("leaf {} has no class", id)))?;
                Ok(RuleNode::Leaf {
                    id,
                    criterion: criterion.to_string(),
                    impurity: *impurity,
                    samples: *samples,
                    value: slots,
                    class,
                })
            }
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
                impurity,
                samples,
            } => {
                let name = feature_names.get(*feature).ok_or_else(|| {
                    TunerError::UnknownFeature(format!("feature index {}", feature))
                })?;
                let left = self.encode(tree, *left, feature_names, criterion, visited)?;
                let right = self.encode(tree, *right, feature_names, criterion, visited)?;
                Ok(RuleNode::Split {
                    id,
                    rule: SplitRule::for_split(name, *threshold),
                    criterion: criterion.to_string(),
                    impurity: *impurity,
                    samples: *samples,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
        }
    }

    /// Serialize every trained region and append the fallback region
    ///
    /// A region that fails is left out and reported; the rest are unaffected.
    pub fn serialize_all(
        &self,
        models: &BTreeMap<String, RegionModel>,
        feature_names: &[String],
    ) -> SerializedRules {
        let mut out = SerializedRules::default();

        for (region, model) in models {
            if region == FALLBACK_REGION {
                continue;
            }
            match self.serialize_tree(&model.tree, feature_names) {
                Ok(node) => {
                    out.rules.insert(region.clone(), RegionRule::Tree(node));
                }
                Err(e) => {
                    warn!(region = %region, error = %e, "Failed to serialize region tree");
                    out.failed.push((region.clone(), e.to_string()));
                }
            }
        }

        out.rules
            .insert(FALLBACK_REGION.to_string(), RegionRule::constant(FALLBACK_POLICY));
        out
    }
}

/// Spread per-class weights into fixed slots indexed by policy
fn reindex(value: &[f64], classes: &[u32]) -> Result<Vec<f64>> {
    let mut slots = vec![0.0; LEAF_VALUE_SLOTS];
    for (weight, class) in value.iter().zip(classes) {
        let slot = slots.get_mut(*class as usize).ok_or(TunerError::UnknownClass {
            index: *class as usize,
            available: LEAF_VALUE_SLOTS,
        })?;
        *slot = *weight;
    }
    Ok(slots)
}
