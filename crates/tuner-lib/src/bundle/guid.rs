//! Bundle identifiers

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic 64-bit guid source seeded from the wall clock
#[derive(Debug)]
pub struct GuidGenerator {
    next: AtomicU64,
}

impl Default for GuidGenerator {
    fn default() -> Self {
        Self::from_clock()
    }
}

impl GuidGenerator {
    /// Seed from the current time in microseconds
    pub fn from_clock() -> Self {
        let micros = chrono::Utc::now().timestamp_micros().max(1) as u64;
        Self::starting_at(micros)
    }

    pub fn starting_at(seed: u64) -> Self {
        Self {
            next: AtomicU64::new(seed),
        }
    }

    pub fn next_guid(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
