//! Region tuning library
//!
//! This crate provides the core functionality for:
//! - Telemetry aggregation into labelled training rows
//! - Per-region decision tree training
//! - Rule serialization and versioned model bundles
//! - Decision code emission for compiled applications
//! - The online control loop and its trigger channels
//! - Health checks and observability

pub mod bundle;
pub mod codegen;
pub mod control;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod publish;
pub mod rules;
pub mod simulate;
pub mod telemetry;
pub mod trainer;

pub use error::{Result, TunerError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{StructuredLogger, TunerMetrics};
