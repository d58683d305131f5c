//! Control loop driver
//!
//! WAIT_FOR_DATA polls the frame counter until it has advanced by the
//! configured interval, then one cycle trains and publishes. Shutdown is
//! checked on every wait iteration and at each cycle boundary.

use super::{
    CodegenSettings, ControlConfig, ControlLoopState, CycleBuild, CycleReport, Pipeline,
    RepublishPolicy, RunSummary, TelemetryWindow,
};
use crate::bundle::GuidGenerator;
use crate::codegen::{CodeEmitter, FeatureTable};
use crate::health::{components, HealthRegistry};
use crate::observability::{StructuredLogger, TunerMetrics};
use crate::publish::{file_safe_name, PublishChannel, TriggerMessage};
use crate::telemetry::{RegionRegistry, TelemetrySource};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// The online driver; owns its state exclusively
pub struct ControlLoop {
    source: Arc<dyn TelemetrySource>,
    channel: Arc<dyn PublishChannel>,
    config: ControlConfig,
    state: ControlLoopState,
    pipeline: Pipeline,
    registry: RegionRegistry,
    guids: GuidGenerator,
    metrics: TunerMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
}

impl ControlLoop {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        channel: Arc<dyn PublishChannel>,
        config: ControlConfig,
    ) -> Self {
        let pipeline = Pipeline::new(config.aggregator.clone(), config.trainer.clone());
        Self {
            source,
            channel,
            config,
            state: ControlLoopState::default(),
            pipeline,
            registry: RegionRegistry::new(),
            guids: GuidGenerator::from_clock(),
            metrics: TunerMetrics::new(),
            logger: StructuredLogger::new("tuner"),
            health: HealthRegistry::new(),
        }
    }

    pub fn state(&self) -> &ControlLoopState {
        &self.state
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn registry(&self) -> &RegionRegistry {
        &self.registry
    }

    /// Run until shutdown or, with `run_once`, until the first cycle completes
    ///
    /// Telemetry and channel failures end the loop with an error.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<RunSummary> {
        info!(
            frame_interval = self.config.frame_interval,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            window = ?self.config.window,
            republish = ?self.config.republish,
            run_once = self.config.run_once,
            "Starting control loop"
        );
        self.health.register_all().await;

        let mut summary = RunSummary::default();

        loop {
            if shutdown_requested(&mut shutdown) {
                info!("Shutdown requested at cycle boundary");
                break;
            }

            let Some(frame) = self.wait_for_data(&mut shutdown).await? else {
                info!("Shutting down control loop");
                break;
            };

            let report = self.run_cycle(frame).await?;
            summary.cycles += 1;
            if report.published {
                summary.published += 1;
                summary.last_guid = Some(report.guid);
            } else {
                summary.suppressed += 1;
            }

            if self.config.run_once {
                info!(step = report.step, "Run-once cycle complete");
                break;
            }
        }

        summary.watermark = self.state.watermark;
        Ok(summary)
    }

    /// Poll the frame counter until it passes the watermark by the interval
    ///
    /// Returns `None` when shutdown arrives first.
    async fn wait_for_data(&mut self, shutdown: &mut broadcast::Receiver<()>) -> Result<Option<u64>> {
        let target = self.state.watermark.saturating_add(self.config.frame_interval);
        let started = Instant::now();

        loop {
            let frame = match self.source.max_frame().await {
                Ok(frame) => frame,
                Err(e) => {
                    self.health
                        .set_unhealthy(components::TELEMETRY, e.to_string())
                        .await;
                    return Err(e.context("Failed to read telemetry frame counter"));
                }
            };

            if frame >= target {
                debug!(
                    frame = frame,
                    watermark = self.state.watermark,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Frame interval reached"
                );
                return Ok(Some(frame));
            }

            debug!(
                frame = frame,
                target = target,
                "Waiting for telemetry frames"
            );

            tokio::select! {
                _ = sleep(self.config.poll_interval) => {}
                _ = shutdown.recv() => return Ok(None),
            }
        }
    }

    /// One TRAIN and PUBLISH pass triggered at `frame`
    pub async fn run_cycle(&mut self, frame: u64) -> Result<CycleReport> {
        let cycle_start = Instant::now();
        let step = self.state.step;

        let since = match self.config.window {
            TelemetryWindow::Cumulative => None,
            TelemetryWindow::Delta => self.state.consumed,
        };
        let samples = match self.source.fetch(since).await {
            Ok(samples) => samples,
            Err(e) => {
                self.health
                    .set_unhealthy(components::TELEMETRY, e.to_string())
                    .await;
                return Err(e.context("Failed to fetch telemetry"));
            }
        };
        self.health.set_healthy(components::TELEMETRY).await;

        let consumed = self.state.consumed;
        self.registry
            .observe_all(samples.iter().filter(|s| consumed.map_or(true, |c| s.frame > c)));
        if let Some(max) = samples.iter().map(|s| s.frame).max() {
            self.state.consumed = Some(self.state.consumed.map_or(max, |c| c.max(max)));
        }

        let guid = self.guids.next_guid();
        let build = self.pipeline.build(guid, &self.registry.names(), &samples);

        self.report_training(step, &build).await;
        self.write_artifacts(step, &build).await;

        let published = self.publish(step, &build).await?;

        self.state.watermark = frame;
        self.state.step += 1;
        self.metrics.set_frame_watermark(frame);
        self.metrics
            .observe_cycle_latency(cycle_start.elapsed().as_secs_f64());
        self.health.set_ready(true).await;

        self.logger.log_cycle(
            step,
            frame,
            samples.len(),
            build.rows.len(),
            build.outcome.models.len(),
            build.timings.aggregate.as_millis(),
            build.timings.train.as_millis(),
            build.timings.serialize.as_millis(),
        );

        Ok(CycleReport {
            step,
            guid,
            published,
            regions_trained: build.outcome.models.len(),
            coverage_gaps: build.coverage_gaps,
        })
    }

    async fn report_training(&self, step: u64, build: &CycleBuild) {
        self.metrics
            .observe_training_latency(build.timings.train.as_secs_f64());
        self.metrics.set_region_counts(
            build.outcome.models.len() as i64,
            build.coverage_gaps.len() as i64,
        );
        self.logger.log_coverage_gap(step, &build.coverage_gaps);
        for region in &build.coverage_gaps {
            debug!(
                step = step,
                region = %region,
                observed = self.registry.samples(region),
                "Region served by fallback rule"
            );
        }

        let failures = build.outcome.failed.len() + build.serialize_failures.len();
        if failures > 0 {
            self.health
                .set_degraded(
                    components::TRAINER,
                    format!("{} regions failed to train or serialize", failures),
                )
                .await;
        } else if !build.coverage_gaps.is_empty() {
            self.health
                .set_degraded(
                    components::TRAINER,
                    format!("{} regions without a model", build.coverage_gaps.len()),
                )
                .await;
        } else {
            self.health.set_healthy(components::TRAINER).await;
        }
    }

    /// Send the bundle unless suppression applies; returns whether it was sent
    async fn publish(&mut self, step: u64, build: &CycleBuild) -> Result<bool> {
        let bundle = &build.bundle;

        if self.config.republish == RepublishPolicy::SuppressUnchanged {
            if let Some(previous) = &self.state.last_published {
                if previous.same_contents(bundle) {
                    self.metrics.inc_publishes_suppressed();
                    self.logger.log_suppressed(step, bundle.guid);
                    return Ok(false);
                }
            }
        }

        let payload = bundle
            .to_json()
            .context("Failed to encode bundle")?
            .into_bytes();
        let message = TriggerMessage::new(self.config.channel.clone(), payload);
        let bytes = message.len;

        if let Err(e) = self.channel.trigger(message).await {
            self.health
                .set_unhealthy(components::PUBLISHER, e.to_string())
                .await;
            return Err(e.context(format!(
                "Failed to publish bundle on channel {}",
                self.config.channel
            )));
        }
        self.health.set_healthy(components::PUBLISHER).await;

        self.metrics.inc_bundles_published();
        self.metrics.set_bundle_guid(bundle.guid);
        self.logger
            .log_published(step, bundle.guid, &self.config.channel, bytes);

        self.state.last_published = Some(bundle.clone());
        Ok(true)
    }

    /// Write `step.<n>.bundle.json`, the region id table and per-region decision code
    ///
    /// Artifact failures are logged and never fail the cycle.
    async fn write_artifacts(&self, step: u64, build: &CycleBuild) {
        let Some(dir) = &self.config.artifact_dir else {
            return;
        };

        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(dir = %dir.display(), error = %e, "Failed to create artifact directory");
            return;
        }

        match build.bundle.to_json() {
            Ok(text) => {
                let path = dir.join(format!("step.{}.bundle.json", step));
                write_artifact(&path, text).await;
            }
            Err(e) => warn!(step = step, error = %e, "Failed to encode bundle artifact"),
        }

        match serde_json::to_string_pretty(&self.registry.name_swap()) {
            Ok(text) => {
                let path = dir.join(format!("step.{}.regions.json", step));
                write_artifact(&path, text).await;
            }
            Err(e) => warn!(step = step, error = %e, "Failed to encode region table"),
        }

        if let Some(settings) = &self.config.codegen {
            emit_region_code(dir, step, build, settings).await;
        }
    }
}

async fn emit_region_code(dir: &Path, step: u64, build: &CycleBuild, settings: &CodegenSettings) {
    let emitter = CodeEmitter::new(settings.kind, settings.class_names.clone());
    let features = FeatureTable::resolve(&build.bundle.features.names, &settings.derived);

    for region in build.bundle.trained_regions() {
        let Some(tree) = build
            .bundle
            .driver
            .rules
            .get(region)
            .and_then(|rule| rule.as_tree())
        else {
            continue;
        };

        match emitter.emit(tree, &features) {
            Ok(code) => {
                let path = dir.join(format!("step.{}.{}.inc", step, file_safe_name(region)));
                write_artifact(&path, code.to_source()).await;
            }
            Err(e) => warn!(
                step = step,
                region = %region,
                kind = %settings.kind,
                error = %e,
                "Failed to emit decision code"
            ),
        }
    }
}

async fn write_artifact(path: &Path, contents: String) {
    match tokio::fs::write(path, contents).await {
        Ok(()) => debug!(path = %path.display(), "Wrote artifact"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to write artifact"),
    }
}

/// True once a shutdown message arrived or every sender is gone
fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

/// Builder for the control loop
pub struct ControlLoopBuilder {
    source: Option<Arc<dyn TelemetrySource>>,
    channel: Option<Arc<dyn PublishChannel>>,
    config: ControlConfig,
    guids: Option<GuidGenerator>,
    logger: Option<StructuredLogger>,
    health: Option<HealthRegistry>,
}

impl ControlLoopBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            channel: None,
            config: ControlConfig::default(),
            guids: None,
            logger: None,
            health: None,
        }
    }

    pub fn source(mut self, source: Arc<dyn TelemetrySource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn channel(mut self, channel: Arc<dyn PublishChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn config(mut self, config: ControlConfig) -> Self {
        self.config = config;
        self
    }

    pub fn frame_interval(mut self, frames: u64) -> Self {
        self.config.frame_interval = frames;
        self
    }

    pub fn poll_interval(mut self, interval: std::time::Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn run_once(mut self, run_once: bool) -> Self {
        self.config.run_once = run_once;
        self
    }

    pub fn window(mut self, window: TelemetryWindow) -> Self {
        self.config.window = window;
        self
    }

    pub fn republish(mut self, policy: RepublishPolicy) -> Self {
        self.config.republish = policy;
        self
    }

    pub fn artifact_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.artifact_dir = Some(dir.into());
        self
    }

    pub fn codegen(mut self, settings: CodegenSettings) -> Self {
        self.config.codegen = Some(settings);
        self
    }

    pub fn guids(mut self, guids: GuidGenerator) -> Self {
        self.guids = Some(guids);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Share a health registry with the probe endpoints
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<ControlLoop> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Telemetry source is required"))?;
        let channel = self
            .channel
            .ok_or_else(|| anyhow::anyhow!("Publish channel is required"))?;

        let mut control = ControlLoop::new(source, channel, self.config);
        if let Some(guids) = self.guids {
            control.guids = guids;
        }
        if let Some(logger) = self.logger {
            control.logger = logger;
        }
        if let Some(health) = self.health {
            control.health = health;
        }
        Ok(control)
    }
}

impl Default for ControlLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
