//! Per-region model training

mod cart;
mod region;
mod tree;

pub use cart::{CartConfig, GiniTreeInducer};
pub use region::{RegionModel, RegionModelTrainer, TrainerConfig, TrainingOutcome};
pub use tree::{TrainedTree, TreeNode};

use crate::error::Result;

/// Trait for tree induction implementations
pub trait TreeInducer: Send + Sync {
    /// Fit a classification tree to rows of `x` labelled by `y`
    fn fit(&self, x: &[Vec<f64>], y: &[u32]) -> Result<TrainedTree>;
}
