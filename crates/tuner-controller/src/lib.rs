//! Tuning controller process
//!
//! Runs the control loop against a telemetry file and a bundle directory,
//! and serves health and metrics endpoints.

pub mod api;
pub mod config;
