//! Class-name to execution-policy expression table

use crate::error::{Result, TunerError};
use std::collections::BTreeMap;

const SEGMENT_ITERATORS: &[(&str, &str)] = &[
    ("SEQ_SEGIT", "RAJA::seq_segit"),
    ("OMP_SEGIT", "RAJA::omp_parallel_for_segit"),
    ("CILK_SEGIT", "RAJA::cilk_for_segit"),
];

const SEGMENT_EXECUTORS: &[(&str, &str)] = &[
    ("SEQ_EXEC", "RAJA::seq_exec"),
    ("SEG_SEQ", "RAJA::seq_exec"),
    ("OMP_PARALLEL", "RAJA::omp_parallel_for_exec"),
    ("SEG_OMP", "RAJA::omp_parallel_for_exec"),
    ("CILK_FOR", "RAJA::cilk_for_exec"),
    ("SEG_CILK", "RAJA::cilk_for_exec"),
    ("SEG_SIMD", "RAJA::simd_exec"),
];

/// Lookup table validated at emission time
#[derive(Debug, Clone, Default)]
pub struct ExecutionPolicyTable {
    policies: BTreeMap<String, String>,
}

impl ExecutionPolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every segment-iterator and segment-executor pairing, keyed `"<ITER> <EXEC>"`
    pub fn index_set_defaults() -> Self {
        let mut table = Self::new();
        for (iter_name, iter_policy) in SEGMENT_ITERATORS {
            for (exec_name, exec_policy) in SEGMENT_EXECUTORS {
                table.insert(
                    format!("{} {}", iter_name, exec_name),
                    format!(
                        "RAJA::IndexSet::ExecPolicy<{}, {}>{{}}",
                        iter_policy, exec_policy
                    ),
                );
            }
        }
        table.insert(
            "CILK_FOR CILK_FOR",
            "RAJA::IndexSet::ExecPolicy<RAJA::cilk_for_segit, RAJA::cilk_for_exec>{}",
        );
        table
    }

    pub fn insert(&mut self, class: impl Into<String>, expression: impl Into<String>) {
        self.policies.insert(class.into(), expression.into());
    }

    pub fn lookup(&self, class: &str) -> Result<&str> {
        self.policies
            .get(class)
            .map(String::as_str)
            .ok_or_else(|| TunerError::UnmappedClass(class.to_string()))
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
