//! Induced decision tree representation

use crate::error::{Result, TunerError};
use serde::{Deserialize, Serialize};

/// One node of an induced tree, addressed by its index in the arena
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        impurity: f64,
        samples: usize,
    },
    Leaf {
        /// Weighted count per entry of the tree's class list
        value: Vec<f64>,
        impurity: f64,
        samples: usize,
    },
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Leaf { .. })
    }

    pub fn samples(&self) -> usize {
        match self {
            TreeNode::Split { samples, .. } | TreeNode::Leaf { samples, .. } => *samples,
        }
    }

    pub fn impurity(&self) -> f64 {
        match self {
            TreeNode::Split { impurity, .. } | TreeNode::Leaf { impurity, .. } => *impurity,
        }
    }
}

/// A binary classification tree with the root at index 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedTree {
    nodes: Vec<TreeNode>,
    /// Policy index for each slot of a leaf value vector
    classes: Vec<u32>,
    criterion: String,
}

impl TrainedTree {
    /// Build a tree, checking that every child reference is in range
    /// and that the root reaches each node at most once
    pub fn new(nodes: Vec<TreeNode>, classes: Vec<u32>, criterion: impl Into<String>) -> Result<Self> {
        let tree = Self {
            nodes,
            classes,
            criterion: criterion.into(),
        };
        tree.validate()?;
        Ok(tree)
    }

    /// Single-leaf tree that always predicts `class`
    pub fn constant(class: u32, samples: usize) -> Self {
        Self {
            nodes: vec![TreeNode::Leaf {
                value: vec![samples as f64],
                impurity: 0.0,
                samples,
            }],
            classes: vec![class],
            criterion: "gini".to_string(),
        }
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn node(&self, id: usize) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    pub fn classes(&self) -> &[u32] {
        &self.classes
    }

    pub fn criterion(&self) -> &str {
        &self.criterion
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Longest root-to-leaf path, counted in edges
    pub fn depth(&self) -> usize {
        fn walk(tree: &TrainedTree, id: usize) -> usize {
            match &tree.nodes[id] {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + walk(tree, *left).max(walk(tree, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(self, 0)
        }
    }

    /// Predicted policy for a leaf value vector (first maximum wins)
    pub fn leaf_class(&self, value: &[f64]) -> Option<u32> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, weight) in value.iter().enumerate() {
            if best.map_or(true, |(_, w)| *weight > w) {
                best = Some((idx, *weight));
            }
        }
        best.and_then(|(idx, _)| self.classes.get(idx).copied())
    }

    /// Predict the policy for a dense feature row
    pub fn predict(&self, row: &[f64]) -> Option<u32> {
        let mut id = 0;
        loop {
            match self.nodes.get(id)? {
                TreeNode::Leaf { value, .. } => return self.leaf_class(value),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    id = if *row.get(*feature)? <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(TunerError::malformed("tree has no nodes"));
        }

        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![0usize];
        while let Some(id) = stack.pop() {
            if visited[id] {
                return Err(TunerError::malformed(format!("node {} is reachable twice", id)));
            }
            visited[id] = true;

            match &self.nodes[id] {
                TreeNode::Split { left, right, .. } => {
                    for child in [*left, *right] {
                        if child >= self.nodes.len() {
                            return Err(TunerError::malformed(format!(
                                "node {} references missing child {}",
                                id, child
                            )));
                        }
                        stack.push(child);
                    }
                }
                TreeNode::Leaf { value, .. } => {
                    if value.len() > self.classes.len() {
                        return Err(TunerError::malformed(format!(
                            "leaf {} has {} values for {} classes",
                            id,
                            value.len(),
                            self.classes.len()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(value: Vec<f64>) -> TreeNode {
        let samples = value.iter().sum::<f64>() as usize;
        TreeNode::Leaf {
            value,
            impurity: 0.0,
            samples,
        }
    }

    fn stump() -> TrainedTree {
        TrainedTree::new(
            vec![
                TreeNode::Split {
                    feature: 0,
                    threshold: 55.0,
                    left: 1,
                    right: 2,
                    impurity: 0.5,
                    samples: 2,
                },
                leaf(vec![0.0, 1.0]),
                leaf(vec![1.0, 0.0]),
            ],
            vec![0, 1],
            "gini",
        )
        .unwrap()
    }

    #[test]
    fn test_predict_walks_splits() {
        let tree = stump();
        assert_eq!(tree.predict(&[10.0]), Some(1));
        assert_eq!(tree.predict(&[55.0]), Some(1));
        assert_eq!(tree.predict(&[100.0]), Some(0));
        assert_eq!(tree.predict(&[]), None);
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.leaf_count(), 2);
    }

    #[test]
    fn test_rejects_dangling_child() {
        let result = TrainedTree::new(
            vec![TreeNode::Split {
                feature: 0,
                threshold: 1.0,
                left: 1,
                right: 7,
                impurity: 0.5,
                samples: 2,
            }],
            vec![0],
            "gini",
        );
        assert!(matches!(result, Err(TunerError::MalformedTree(_))));
    }

    #[test]
    fn test_rejects_cycle() {
        let result = TrainedTree::new(
            vec![
                TreeNode::Split {
                    feature: 0,
                    threshold: 1.0,
                    left: 1,
                    right: 0,
                    impurity: 0.5,
                    samples: 2,
                },
                leaf(vec![1.0]),
            ],
            vec![0],
            "gini",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_empty_tree() {
        assert!(TrainedTree::new(Vec::new(), Vec::new(), "gini").is_err());
    }

    #[test]
    fn test_leaf_class_ties_take_first() {
        let tree = TrainedTree::constant(3, 4);
        assert_eq!(tree.leaf_class(&[2.0]), Some(3));

        let tree = stump();
        assert_eq!(tree.leaf_class(&[1.0, 1.0]), Some(0));
    }
}
