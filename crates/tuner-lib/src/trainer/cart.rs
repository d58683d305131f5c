//! Default CART classifier
//!
//! Greedy binary splits minimizing weighted gini impurity. Candidate
//! thresholds are midpoints between consecutive distinct values. Ties
//! between candidates go to the lowest feature index, then the lowest
//! threshold, so the same input always yields the same tree.

use super::tree::{TrainedTree, TreeNode};
use super::TreeInducer;
use crate::error::{Result, TunerError};

/// Hyperparameters for [`GiniTreeInducer`]
#[derive(Debug, Clone)]
pub struct CartConfig {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub min_samples_split: usize,
    pub min_impurity_decrease: f64,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            min_samples_leaf: 1,
            min_samples_split: 2,
            min_impurity_decrease: 1e-7,
        }
    }
}

/// Deterministic gini-criterion tree inducer
#[derive(Debug, Clone, Default)]
pub struct GiniTreeInducer {
    config: CartConfig,
}

struct Candidate {
    feature: usize,
    threshold: f64,
    decrease: f64,
}

impl GiniTreeInducer {
    pub fn new(config: CartConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CartConfig {
        &self.config
    }

    fn grow(
        &self,
        x: &[Vec<f64>],
        labels: &[usize],
        n_classes: usize,
        indices: Vec<usize>,
        depth: usize,
        nodes: &mut Vec<TreeNode>,
    ) -> usize {
        let counts = class_counts(labels, &indices, n_classes);
        let impurity = gini(&counts, indices.len());
        let samples = indices.len();

        let id = nodes.len();
        nodes.push(TreeNode::Leaf {
            value: counts.clone(),
            impurity,
            samples,
        });

        if depth >= self.config.max_depth
            || samples < self.config.min_samples_split
            || samples < 2 * self.config.min_samples_leaf
            || impurity <= 0.0
        {
            return id;
        }

        let Some(best) = self.best_split(x, labels, n_classes, &indices, impurity) else {
            return id;
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| x[i][best.feature] <= best.threshold);

        let left = self.grow(x, labels, n_classes, left_idx, depth + 1, nodes);
        let right = self.grow(x, labels, n_classes, right_idx, depth + 1, nodes);

        nodes[id] = TreeNode::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
            impurity,
            samples,
        };
        id
    }

    fn best_split(
        &self,
        x: &[Vec<f64>],
        labels: &[usize],
        n_classes: usize,
        indices: &[usize],
        impurity: f64,
    ) -> Option<Candidate> {
        let n = indices.len();
        let min_leaf = self.config.min_samples_leaf.max(1);
        let n_features = x.first().map_or(0, Vec::len);
        let mut best: Option<Candidate> = None;

        for feature in 0..n_features {
            let mut order: Vec<usize> = indices.to_vec();
            order.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

            let mut left_counts = vec![0.0; n_classes];
            let mut right_counts = class_counts(labels, indices, n_classes);

            for pos in 0..n - 1 {
                let label = labels[order[pos]];
                left_counts[label] += 1.0;
                right_counts[label] -= 1.0;

                let lo = x[order[pos]][feature];
                let hi = x[order[pos + 1]][feature];
                let n_left = pos + 1;
                let n_right = n - n_left;
                if lo >= hi || n_left < min_leaf || n_right < min_leaf {
                    continue;
                }

                let weighted = (n_left as f64 * gini(&left_counts, n_left)
                    + n_right as f64 * gini(&right_counts, n_right))
                    / n as f64;
                let decrease = impurity - weighted;
                if decrease < self.config.min_impurity_decrease {
                    continue;
                }

                if best.as_ref().map_or(true, |b| decrease > b.decrease) {
                    best = Some(Candidate {
                        feature,
                        threshold: midpoint(lo, hi),
                        decrease,
                    });
                }
            }
        }

        best
    }
}

impl TreeInducer for GiniTreeInducer {
    fn fit(&self, x: &[Vec<f64>], y: &[u32]) -> Result<TrainedTree> {
        if x.is_empty() {
            return Err(TunerError::training("empty feature matrix"));
        }
        if x.len() != y.len() {
            return Err(TunerError::training(format!(
                "feature matrix has {} rows but label vector has {}",
                x.len(),
                y.len()
            )));
        }
        let width = x[0].len();
        if x.iter().any(|row| row.len() != width) {
            return Err(TunerError::training("feature rows have different widths"));
        }

        let mut classes: Vec<u32> = y.to_vec();
        classes.sort_unstable();
        classes.dedup();

        let labels: Vec<usize> = y
            .iter()
            .map(|label| classes.binary_search(label).unwrap_or(0))
            .collect();

        let mut nodes = Vec::new();
        self.grow(x, &labels, classes.len(), (0..x.len()).collect(), 0, &mut nodes);

        TrainedTree::new(nodes, classes, "gini")
    }
}

fn class_counts(labels: &[usize], indices: &[usize], n_classes: usize) -> Vec<f64> {
    let mut counts = vec![0.0; n_classes];
    for &i in indices {
        counts[labels[i]] += 1.0;
    }
    counts
}

fn gini(counts: &[f64], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts.iter().map(|c| (c / total) * (c / total)).sum::<f64>()
}

/// Midpoint that stays strictly below `hi` so `lo` goes left
fn midpoint(lo: f64, hi: f64) -> f64 {
    let mid = lo / 2.0 + hi / 2.0;
    if mid >= hi || !mid.is_finite() {
        lo
    } else {
        mid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_split_on_separable_data() {
        let inducer = GiniTreeInducer::default();
        let tree = inducer.fit(&[vec![10.0], vec![100.0]], &[1, 0]).unwrap();

        assert_eq!(tree.len(), 3);
        assert_eq!(tree.classes(), &[0, 1]);
        match &tree.nodes()[0] {
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
                impurity,
                samples,
            } => {
                assert_eq!(*feature, 0);
                assert_eq!(*threshold, 55.0);
                assert_eq!((*left, *right), (1, 2));
                assert!((impurity - 0.5).abs() < 1e-12);
                assert_eq!(*samples, 2);
            }
            other => panic!("expected split, got {:?}", other),
        }
        assert_eq!(tree.predict(&[10.0]), Some(1));
        assert_eq!(tree.predict(&[100.0]), Some(0));
    }

    #[test]
    fn test_pure_labels_give_single_leaf() {
        let inducer = GiniTreeInducer::default();
        let tree = inducer
            .fit(&[vec![1.0], vec![2.0], vec![3.0]], &[2, 2, 2])
            .unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.predict(&[9.0]), Some(2));
    }

    #[test]
    fn test_respects_max_depth() {
        let x: Vec<Vec<f64>> = (0..8).map(|i| vec![i as f64]).collect();
        let y: Vec<u32> = (0..8).map(|i| (i % 2) as u32).collect();

        let inducer = GiniTreeInducer::new(CartConfig {
            max_depth: 2,
            ..Default::default()
        });
        let tree = inducer.fit(&x, &y).unwrap();
        assert!(tree.depth() <= 2);
    }

    #[test]
    fn test_respects_min_samples_leaf() {
        let x: Vec<Vec<f64>> = (0..4).map(|i| vec![i as f64]).collect();
        let inducer = GiniTreeInducer::new(CartConfig {
            min_samples_leaf: 2,
            ..Default::default()
        });
        let tree = inducer.fit(&x, &[0, 1, 1, 1]).unwrap();
        for node in tree.nodes() {
            if node.is_leaf() {
                assert!(node.samples() >= 2);
            }
        }
    }

    #[test]
    fn test_tie_prefers_first_feature() {
        // Both columns separate the labels equally well
        let x = vec![vec![1.0, 1.0], vec![2.0, 2.0]];
        let tree = GiniTreeInducer::default().fit(&x, &[0, 1]).unwrap();
        match &tree.nodes()[0] {
            TreeNode::Split { feature, .. } => assert_eq!(*feature, 0),
            other => panic!("expected split, got {:?}", other),
        }
    }

    #[test]
    fn test_deterministic() {
        let x: Vec<Vec<f64>> = (0..12)
            .map(|i| vec![(i * 7 % 5) as f64, (i % 3) as f64])
            .collect();
        let y: Vec<u32> = (0..12).map(|i| (i % 4) as u32).collect();
        let inducer = GiniTreeInducer::default();
        assert_eq!(inducer.fit(&x, &y).unwrap(), inducer.fit(&x, &y).unwrap());
    }

    #[test]
    fn test_rejects_mismatched_input() {
        let inducer = GiniTreeInducer::default();
        assert!(inducer.fit(&[], &[]).is_err());
        assert!(inducer.fit(&[vec![1.0]], &[0, 1]).is_err());
        assert!(inducer.fit(&[vec![1.0], vec![1.0, 2.0]], &[0, 1]).is_err());
    }

    #[test]
    fn test_midpoint_stays_below_upper_value() {
        assert_eq!(midpoint(1.0, 2.0), 1.5);
        let lo: f64 = 1.0;
        let hi = f64::from_bits(lo.to_bits() + 1);
        assert_eq!(midpoint(lo, hi), lo);
    }
}
