//! Tuning controller
//!
//! Long-running process that retrains region models as telemetry frames
//! arrive and publishes rule bundles to the runtime's channel directory.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tuner_controller::{api, config::ControllerConfig};
use tuner_lib::{
    control::ControlLoopBuilder,
    health::HealthRegistry,
    observability::{StructuredLogger, TunerMetrics},
    publish::DirectoryChannel,
    telemetry::JsonLinesSource,
};

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting tuner-controller");

    let config = ControllerConfig::load()?;
    info!(
        instance = %config.instance,
        telemetry = %config.telemetry_path.display(),
        publish_dir = %config.publish_dir.display(),
        "Controller configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = TunerMetrics::new();

    let logger = StructuredLogger::new(&config.instance);
    logger.log_startup(CONTROLLER_VERSION, &config.channel);

    let channel = Arc::new(
        DirectoryChannel::new(config.directory_channel())
            .context("Failed to open bundle directory")?,
    );

    let app_state = Arc::new(
        api::AppState::new(health_registry.clone(), metrics).with_channel(channel.clone()),
    );
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let control = ControlLoopBuilder::new()
        .source(Arc::new(JsonLinesSource::new(&config.telemetry_path)))
        .channel(channel)
        .config(config.control_config()?)
        .logger(logger.clone())
        .health(health_registry.clone())
        .build()?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut loop_handle = tokio::spawn(control.run(shutdown_rx));

    let joined = tokio::select! {
        joined = &mut loop_handle => joined,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("SIGINT received, stopping control loop");
            // Receiver may already be gone if the loop just exited
            let _ = shutdown_tx.send(());
            loop_handle.await
        }
    };
    api_handle.abort();

    match joined.context("Control loop task panicked")? {
        Ok(summary) => {
            info!(summary = %summary, "Control loop finished");
            logger.log_shutdown("control loop finished");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Control loop stopped on channel failure");
            logger.log_shutdown("channel failure");
            Err(e)
        }
    }
}
