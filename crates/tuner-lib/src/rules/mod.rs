//! Rule-tree encoding shared with the runtime

mod node;
mod serializer;

pub use node::{RegionRule, RuleNode, SplitRule};
pub use serializer::{RuleSerializer, SerializedRules, FALLBACK_POLICY};
