//! Telemetry intake
//!
//! This module provides the pull interface to the measurement store,
//! the aggregator that reduces raw samples into labelled rows, and the
//! central region name registry.

mod aggregator;
mod registry;
mod source;

pub use aggregator::{AggregatorConfig, TelemetryAggregator, DEFAULT_DROP_FIELDS};
pub(crate) use aggregator::feature_key;
pub use registry::RegionRegistry;
pub use source::{JsonLinesSource, MemoryTelemetrySource};

use crate::models::TelemetrySample;
use anyhow::Result;

pub use async_trait::async_trait;

/// Trait for telemetry store implementations
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Highest frame flushed to the store so far
    async fn max_frame(&self) -> Result<u64>;

    /// Fetch samples with a frame strictly greater than `since`, or all samples when `None`
    async fn fetch(&self, since: Option<u64>) -> Result<Vec<TelemetrySample>>;
}
