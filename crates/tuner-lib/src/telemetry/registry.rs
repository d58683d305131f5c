//! Central registry of observed region names

use crate::models::{TelemetrySample, FALLBACK_REGION};
use dashmap::DashMap;
use std::collections::BTreeMap;
use tracing::debug;

/// Registry of every region name seen in telemetry, with sample counts
#[derive(Debug, Default)]
pub struct RegionRegistry {
    regions: DashMap<String, u64>,
}

impl RegionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sample for a region
    pub fn observe(&self, region_name: &str) {
        if let Some(mut count) = self.regions.get_mut(region_name) {
            *count += 1;
            return;
        }
        debug!(region = %region_name, "Registering region");
        *self.regions.entry(region_name.to_string()).or_insert(0) += 1;
    }

    /// Record every sample of a batch
    pub fn observe_all<'a>(&self, samples: impl IntoIterator<Item = &'a TelemetrySample>) {
        for sample in samples {
            self.observe(&sample.region_name);
        }
    }

    /// Samples recorded for a region
    pub fn samples(&self, region_name: &str) -> u64 {
        self.regions.get(region_name).map(|c| *c).unwrap_or(0)
    }

    /// Observed region names, sorted, without the fallback
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.regions.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Numeric id to name table, ids assigned in sorted-name order
    ///
    /// The fallback region is always part of the table.
    pub fn name_swap(&self) -> BTreeMap<u32, String> {
        let mut names = self.names();
        if !names.iter().any(|n| n == FALLBACK_REGION) {
            names.push(FALLBACK_REGION.to_string());
            names.sort();
        }
        names
            .into_iter()
            .enumerate()
            .map(|(id, name)| (id as u32, name))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
