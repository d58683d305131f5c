//! Decision code emission command

use anyhow::Result;
use std::collections::BTreeSet;
use std::path::Path;
use tuner_lib::codegen::{CodeEmitter, DecisionKind, FeatureTable};
use tuner_lib::rules::RegionRule;

use super::{load_bundle, CommandError};
use crate::output::write_or_print;

/// Emit the decision code of `region` in `bundle`
pub fn emit(
    bundle: &Path,
    region: &str,
    kind: DecisionKind,
    classes: Vec<String>,
    derived: Vec<String>,
    output: Option<&Path>,
) -> Result<()> {
    let bundle = load_bundle(bundle)?;

    let tree = match bundle.driver.rules.get(region) {
        Some(RegionRule::Tree(tree)) => tree,
        Some(RegionRule::Constant(rule)) => {
            return Err(CommandError::NoTree {
                region: region.to_string(),
                rule: rule.clone(),
            }
            .into())
        }
        None => return Err(CommandError::UnknownRegion(region.to_string()).into()),
    };

    let derived: BTreeSet<String> = derived.into_iter().collect();
    let features = FeatureTable::resolve(&bundle.features.names, &derived);
    let code = CodeEmitter::new(kind, classes).emit(tree, &features)?;

    write_or_print(&code.to_source(), output)
}
