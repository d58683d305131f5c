//! Inline decision code emission
//!
//! Translates a rule tree into nested conditionals for embedding in a
//! compiled application. Output is a preamble of feature bindings
//! followed by the conditional body. Emission either succeeds for the
//! whole tree or returns an error; partial output is never produced.

mod features;
mod policy;

pub use features::{
    Accessor, FeatureDescriptor, FeatureKind, FeatureTable, INSTRUCTION_ACQUIRE, INSTRUCTION_MAP,
};
pub use policy::ExecutionPolicyTable;

use crate::error::{Result, TunerError};
use crate::rules::{RuleNode, SplitRule};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const INDENT: &str = "    ";

/// What a leaf's predicted class selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Policy,
    ChunkSize,
    ThreadCount,
    DynamicFraction,
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecisionKind::Policy => "policy",
            DecisionKind::ChunkSize => "chunk",
            DecisionKind::ThreadCount => "thread",
            DecisionKind::DynamicFraction => "dynamic",
        };
        f.write_str(name)
    }
}

impl FromStr for DecisionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "policy" => Ok(DecisionKind::Policy),
            "chunk" | "chunk_size" | "chunk-size" => Ok(DecisionKind::ChunkSize),
            "thread" | "threads" | "thread_count" | "thread-count" => Ok(DecisionKind::ThreadCount),
            "dynamic" | "fraction" | "dynamic_fraction" | "dynamic-fraction" => {
                Ok(DecisionKind::DynamicFraction)
            }
            other => Err(format!("unknown decision kind '{}'", other)),
        }
    }
}

/// Generated statements, preamble first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmittedCode {
    pub preamble: Vec<String>,
    pub body: Vec<String>,
}

impl EmittedCode {
    pub fn lines(&self) -> impl Iterator<Item = &String> {
        self.preamble.iter().chain(self.body.iter())
    }

    pub fn to_source(&self) -> String {
        let mut out = String::new();
        for line in self.lines() {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

/// Emits decision code for one decision kind
#[derive(Debug, Clone)]
pub struct CodeEmitter {
    kind: DecisionKind,
    class_names: Vec<String>,
    policies: ExecutionPolicyTable,
}

impl CodeEmitter {
    /// `class_names[i]` names the class a leaf predicting policy `i` selects
    pub fn new(kind: DecisionKind, class_names: Vec<String>) -> Self {
        Self {
            kind,
            class_names,
            policies: ExecutionPolicyTable::index_set_defaults(),
        }
    }

    pub fn with_policy_table(mut self, policies: ExecutionPolicyTable) -> Self {
        self.policies = policies;
        self
    }

    pub fn kind(&self) -> DecisionKind {
        self.kind
    }

    pub fn emit(&self, tree: &RuleNode, features: &FeatureTable) -> Result<EmittedCode> {
        let body = self.emit_node(tree, features, 0)?;

        let mut preamble = Vec::new();
        let mut derived_used = false;
        for rule in tree.rules() {
            if features.get(rule.feature())?.kind == FeatureKind::Derived {
                derived_used = true;
            }
        }
        if derived_used {
            preamble.push(INSTRUCTION_ACQUIRE.to_string());
        }
        for descriptor in features.direct() {
            preamble.push(format!(
                "const int {} = __ctx.get_int(\"{}\");",
                descriptor.accessor.expression(),
                descriptor.name
            ));
        }

        Ok(EmittedCode { preamble, body })
    }

    fn emit_node(&self, node: &RuleNode, features: &FeatureTable, depth: usize) -> Result<Vec<String>> {
        let pad = INDENT.repeat(depth);
        match node {
            RuleNode::Split {
                rule, left, right, ..
            } => {
                let descriptor = features.get(rule.feature())?;
                let lhs = descriptor.accessor.expression();
                let condition = match rule {
                    SplitRule::LessOrEqual { threshold, .. } => {
                        format!("{} <= {:.4}", lhs, threshold)
                    }
                    SplitRule::EqualsFalse { .. } => format!("{} == 0", lhs),
                };

                let mut lines = vec![format!("{}if ( {} ) {{", pad, condition)];
                lines.extend(self.emit_node(left, features, depth + 1)?);
                lines.push(format!("{}}} else {{", pad));
                lines.extend(self.emit_node(right, features, depth + 1)?);
                lines.push(format!("{}}}", pad));
                Ok(lines)
            }
            RuleNode::Leaf { class, .. } => {
                let name = self.class_names.get(*class as usize).ok_or(TunerError::UnknownClass {
                    index: *class as usize,
                    available: self.class_names.len(),
                })?;
                Ok(self
                    .terminal(name)?
                    .into_iter()
                    .map(|stmt| format!("{}{}", pad, stmt))
                    .collect())
            }
        }
    }

    fn terminal(&self, class: &str) -> Result<Vec<String>> {
        match self.kind {
            DecisionKind::Policy => {
                let expression = self.policies.lookup(class)?;
                Ok(vec![
                    format!("__policy = {};", expression),
                    "__timer.stop();".to_string(),
                ])
            }
            DecisionKind::ChunkSize => {
                let chunk = parse_class::<u64>(class, "chunk size")?;
                Ok(vec![
                    format!("__config.chunk_size = {};", chunk),
                    format!("omp_set_schedule(omp_sched_dynamic, {});", chunk),
                ])
            }
            DecisionKind::ThreadCount => {
                let threads = parse_class::<u32>(class, "thread count")?;
                Ok(vec![
                    format!("cali_set_int_byname(\"num_threads\", {});", threads),
                    format!("omp_set_num_threads({});", threads),
                ])
            }
            DecisionKind::DynamicFraction => {
                let fraction = parse_class::<f64>(class, "dynamic fraction")?;
                if !fraction.is_finite() {
                    return Err(TunerError::InvalidClassValue {
                        class: class.to_string(),
                        kind: "dynamic fraction",
                    });
                }
                Ok(vec![format!("__config.dynamic_fraction = {};", fraction)])
            }
        }
    }
}

fn parse_class<T: FromStr>(class: &str, kind: &'static str) -> Result<T> {
    class.trim().parse().map_err(|_| TunerError::InvalidClassValue {
        class: class.to_string(),
        kind,
    })
}
