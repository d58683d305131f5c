//! Typed feature accessors for emitted code

use crate::error::{Result, TunerError};
use std::collections::{BTreeMap, BTreeSet};

/// Name of the map holding instruction counts in emitted code
pub const INSTRUCTION_MAP: &str = "__instruction_counts";

/// Statement acquiring the instruction-count map for the call site
pub const INSTRUCTION_ACQUIRE: &str =
    "const auto __instruction_counts = apollo::instruction_counts(__ctx);";

/// Where a feature's value comes from at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    /// Read directly from the execution context
    Direct,
    /// Computed by a runtime call, e.g. instruction-mix counters
    Derived,
}

/// Concrete accessor resolved for one feature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessor {
    /// Local variable bound in the preamble
    Binding(String),
    /// Lookup into the instruction-count map
    InstructionCount(String),
}

impl Accessor {
    /// Expression reading the feature value
    pub fn expression(&self) -> String {
        match self {
            Accessor::Binding(ident) => ident.clone(),
            Accessor::InstructionCount(name) => format!("{}[\"{}\"]", INSTRUCTION_MAP, name),
        }
    }
}

/// One resolved feature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureDescriptor {
    pub name: String,
    pub kind: FeatureKind,
    pub accessor: Accessor,
}

/// Feature descriptors in schema order, resolved once per emission
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    descriptors: Vec<FeatureDescriptor>,
    index: BTreeMap<String, usize>,
}

impl FeatureTable {
    /// Resolve every schema feature; names in `derived` use the instruction map
    pub fn resolve(feature_names: &[String], derived: &BTreeSet<String>) -> Self {
        let mut table = Self::default();
        let mut taken = BTreeSet::new();

        for name in feature_names {
            if table.index.contains_key(name) {
                continue;
            }
            let (kind, accessor) = if derived.contains(name) {
                (FeatureKind::Derived, Accessor::InstructionCount(name.clone()))
            } else {
                let mut ident = sanitize(name);
                if !taken.insert(ident.clone()) {
                    ident = format!("{}_{}", ident, table.descriptors.len());
                    taken.insert(ident.clone());
                }
                (FeatureKind::Direct, Accessor::Binding(ident))
            };
            table.index.insert(name.clone(), table.descriptors.len());
            table.descriptors.push(FeatureDescriptor {
                name: name.clone(),
                kind,
                accessor,
            });
        }
        table
    }

    pub fn get(&self, name: &str) -> Result<&FeatureDescriptor> {
        self.index
            .get(name)
            .map(|&i| &self.descriptors[i])
            .ok_or_else(|| TunerError::UnknownFeature(name.to_string()))
    }

    pub fn descriptors(&self) -> &[FeatureDescriptor] {
        &self.descriptors
    }

    /// Direct features in schema order
    pub fn direct(&self) -> impl Iterator<Item = &FeatureDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.kind == FeatureKind::Direct)
    }
}

/// Turn a feature name into a C identifier
fn sanitize(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    ident
}
