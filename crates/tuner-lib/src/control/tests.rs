//! Control loop tests against in-memory telemetry and channels

use super::*;
use crate::bundle::{GuidGenerator, ModelBundle};
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{TelemetrySample, FALLBACK_REGION};
use crate::publish::{MemoryChannel, PublishChannel};
use crate::telemetry::{MemoryTelemetrySource, TelemetrySource};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

fn sample(region: &str, size: f64, policy: u32, time: f64, frame: u64) -> TelemetrySample {
    TelemetrySample::new(region, policy, time)
        .with_attribute("size", size)
        .with_attribute("mpi_rank", 0.0)
        .with_frame(frame)
}

/// Region R1 where policy 1 wins for small sizes and policy 0 for large ones
fn r1_samples(frame: u64) -> Vec<TelemetrySample> {
    vec![
        sample("R1", 10.0, 0, 5.0, frame),
        sample("R1", 10.0, 1, 2.0, frame),
        sample("R1", 100.0, 0, 50.0, frame),
        sample("R1", 100.0, 1, 90.0, frame),
        // slower repeat measurement, reduced away by the aggregator
        sample("R1", 10.0, 1, 7.0, frame),
    ]
}

fn features(size: f64) -> BTreeMap<String, f64> {
    [("size".to_string(), size)].into_iter().collect()
}

fn fast_config() -> ControlConfig {
    ControlConfig {
        frame_interval: 1,
        poll_interval: Duration::from_millis(5),
        ..Default::default()
    }
}

fn control_loop(
    source: Arc<MemoryTelemetrySource>,
    channel: Arc<MemoryChannel>,
    config: ControlConfig,
) -> ControlLoop {
    ControlLoopBuilder::new()
        .source(source)
        .channel(channel)
        .config(config)
        .guids(GuidGenerator::starting_at(1))
        .build()
        .unwrap()
}

async fn sent_bundles(channel: &MemoryChannel) -> Vec<ModelBundle> {
    channel
        .sent()
        .await
        .iter()
        .map(|m| ModelBundle::from_json(std::str::from_utf8(&m.payload).unwrap()).unwrap())
        .collect()
}

struct FailingSource;

#[async_trait]
impl TelemetrySource for FailingSource {
    async fn max_frame(&self) -> Result<u64> {
        Ok(10)
    }

    async fn fetch(&self, _since: Option<u64>) -> Result<Vec<TelemetrySample>> {
        Err(anyhow::anyhow!("store unavailable"))
    }
}

#[test]
fn test_control_config_default() {
    let config = ControlConfig::default();
    assert_eq!(config.frame_interval, 1000);
    assert_eq!(config.poll_interval, Duration::from_secs(1));
    assert_eq!(config.window, TelemetryWindow::Cumulative);
    assert_eq!(config.republish, RepublishPolicy::SuppressUnchanged);
    assert_eq!(config.channel, "APOLLO_MODELS");
    assert!(!config.run_once);
}

#[test]
fn test_config_enums_parse() {
    assert_eq!("delta".parse::<TelemetryWindow>().unwrap(), TelemetryWindow::Delta);
    assert_eq!(
        "suppress-unchanged".parse::<RepublishPolicy>().unwrap(),
        RepublishPolicy::SuppressUnchanged
    );
    assert_eq!("ALWAYS".parse::<RepublishPolicy>().unwrap(), RepublishPolicy::Always);
    assert!("sometimes".parse::<RepublishPolicy>().is_err());
}

#[test]
fn test_builder_requires_source_and_channel() {
    let channel: Arc<dyn PublishChannel> = Arc::new(MemoryChannel::new());
    assert!(ControlLoopBuilder::new().channel(channel).build().is_err());

    let source: Arc<dyn TelemetrySource> = Arc::new(MemoryTelemetrySource::new());
    assert!(ControlLoopBuilder::new().source(source).build().is_err());
}

#[tokio::test]
async fn test_run_once_publishes_trained_bundle() {
    let source = Arc::new(MemoryTelemetrySource::with_samples(r1_samples(5)));
    let channel = Arc::new(MemoryChannel::new());
    let config = ControlConfig {
        run_once: true,
        ..fast_config()
    };

    let (_tx, rx) = broadcast::channel(1);
    let summary = control_loop(source, channel.clone(), config)
        .run(rx)
        .await
        .unwrap();

    assert_eq!(summary.cycles, 1);
    assert_eq!(summary.published, 1);
    assert_eq!(summary.watermark, 5);
    assert_eq!(summary.last_guid, Some(1));

    let sent = channel.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].channel, "APOLLO_MODELS");
    assert_eq!(sent[0].len, sent[0].payload.len());

    let bundle = &sent_bundles(&channel).await[0];
    assert_eq!(bundle.region_names, vec!["R1", FALLBACK_REGION]);
    assert_eq!(bundle.features.names, vec!["size"]);
    assert_eq!(bundle.decide("R1", &features(10.0)), Some(1));
    assert_eq!(bundle.decide("R1", &features(100.0)), Some(0));
    assert_eq!(bundle.region_sizes["R1"], "(2, 1)");
    assert!(bundle.driver.rules.contains_key(FALLBACK_REGION));
}

#[tokio::test]
async fn test_single_sample_region_falls_back() {
    let source = Arc::new(MemoryTelemetrySource::with_samples(vec![sample(
        "R2", 7.0, 1, 1.0, 3,
    )]));
    let channel = Arc::new(MemoryChannel::new());
    let mut control = control_loop(source, channel.clone(), fast_config());

    let report = control.run_cycle(3).await.unwrap();
    assert!(report.published);
    assert_eq!(report.regions_trained, 0);
    assert_eq!(report.coverage_gaps, vec!["R2"]);

    let bundle = &sent_bundles(&channel).await[0];
    assert!(!bundle.driver.rules.contains_key("R2"));
    assert!(bundle.features.names.is_empty());
    assert_eq!(bundle.decide("R2", &features(7.0)), Some(0));
    bundle.validate().unwrap();
}

#[tokio::test]
async fn test_unchanged_bundle_is_suppressed() {
    let source = Arc::new(MemoryTelemetrySource::with_samples(r1_samples(1)));
    let channel = Arc::new(MemoryChannel::new());
    let mut control = control_loop(source, channel.clone(), fast_config());

    let first = control.run_cycle(1).await.unwrap();
    let second = control.run_cycle(2).await.unwrap();

    assert!(first.published);
    assert!(!second.published);
    assert_ne!(first.guid, second.guid);
    assert_eq!(channel.count().await, 1);
    assert_eq!(control.state().step, 2);
    assert_eq!(control.state().watermark, 2);
    assert_eq!(
        control.state().last_published.as_ref().map(|b| b.guid),
        Some(first.guid)
    );
}

#[tokio::test]
async fn test_always_republishes() {
    let source = Arc::new(MemoryTelemetrySource::with_samples(r1_samples(1)));
    let channel = Arc::new(MemoryChannel::new());
    let config = ControlConfig {
        republish: RepublishPolicy::Always,
        ..fast_config()
    };
    let mut control = control_loop(source, channel.clone(), config);

    control.run_cycle(1).await.unwrap();
    control.run_cycle(2).await.unwrap();

    let bundles = sent_bundles(&channel).await;
    assert_eq!(bundles.len(), 2);
    assert!(bundles[0].same_contents(&bundles[1]));
    assert_ne!(bundles[0].guid, bundles[1].guid);
}

#[tokio::test]
async fn test_changed_bundle_is_republished() {
    let source = Arc::new(MemoryTelemetrySource::with_samples(r1_samples(1)));
    let channel = Arc::new(MemoryChannel::new());
    let mut control = control_loop(source.clone(), channel.clone(), fast_config());

    control.run_cycle(1).await.unwrap();
    source
        .push(vec![sample("R3", 1.0, 0, 1.0, 2), sample("R3", 2.0, 1, 1.0, 2)])
        .await;
    let report = control.run_cycle(2).await.unwrap();

    assert!(report.published);
    assert_eq!(report.regions_trained, 2);
    assert_eq!(channel.count().await, 2);
}

#[tokio::test]
async fn test_cumulative_window_keeps_history() {
    let source = Arc::new(MemoryTelemetrySource::with_samples(r1_samples(1)));
    let channel = Arc::new(MemoryChannel::new());
    let mut control = control_loop(source.clone(), channel.clone(), fast_config());

    control.run_cycle(1).await.unwrap();
    source
        .push(vec![sample("R3", 1.0, 0, 1.0, 2), sample("R3", 2.0, 1, 1.0, 2)])
        .await;
    control.run_cycle(2).await.unwrap();

    let latest = sent_bundles(&channel).await.pop().unwrap();
    assert_eq!(latest.trained_regions(), vec!["R1", "R3"]);
}

#[tokio::test]
async fn test_cumulative_window_counts_each_sample_once() {
    let source = Arc::new(MemoryTelemetrySource::with_samples(r1_samples(1)));
    let channel = Arc::new(MemoryChannel::new());
    let mut control = control_loop(source.clone(), channel, fast_config());

    control.run_cycle(1).await.unwrap();
    source
        .push(vec![sample("R3", 1.0, 0, 1.0, 2), sample("R3", 2.0, 1, 1.0, 2)])
        .await;
    control.run_cycle(2).await.unwrap();
    control.run_cycle(3).await.unwrap();

    assert_eq!(control.registry().samples("R1"), 5);
    assert_eq!(control.registry().samples("R3"), 2);
}

#[tokio::test]
async fn test_delta_window_trains_on_new_samples_only() {
    let source = Arc::new(MemoryTelemetrySource::with_samples(r1_samples(1)));
    let channel = Arc::new(MemoryChannel::new());
    let config = ControlConfig {
        window: TelemetryWindow::Delta,
        ..fast_config()
    };
    let mut control = control_loop(source.clone(), channel.clone(), config);

    control.run_cycle(1).await.unwrap();
    assert_eq!(control.state().consumed, Some(1));

    source
        .push(vec![sample("R3", 1.0, 0, 1.0, 2), sample("R3", 2.0, 1, 1.0, 2)])
        .await;
    let report = control.run_cycle(2).await.unwrap();

    let latest = sent_bundles(&channel).await.pop().unwrap();
    assert_eq!(latest.trained_regions(), vec!["R3"]);
    // R1 stays known to the runtime through the fallback
    assert_eq!(latest.region_names, vec!["R1", "R3", FALLBACK_REGION]);
    assert_eq!(report.coverage_gaps, vec!["R1"]);
}

#[tokio::test]
async fn test_shutdown_while_waiting() {
    let source = Arc::new(MemoryTelemetrySource::new());
    let channel = Arc::new(MemoryChannel::new());
    let config = ControlConfig {
        frame_interval: 1000,
        poll_interval: Duration::from_millis(5),
        ..Default::default()
    };

    let (tx, rx) = broadcast::channel(1);
    let handle = tokio::spawn(control_loop(source, channel.clone(), config).run(rx));

    tokio::time::sleep(Duration::from_millis(30)).await;
    tx.send(()).unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(summary, RunSummary::default());
    assert_eq!(channel.count().await, 0);
}

#[tokio::test]
async fn test_loop_waits_for_frame_interval() {
    let source = Arc::new(MemoryTelemetrySource::with_samples(r1_samples(4)));
    let channel = Arc::new(MemoryChannel::new());
    let config = ControlConfig {
        frame_interval: 4,
        ..fast_config()
    };

    let (tx, rx) = broadcast::channel(1);
    let handle = tokio::spawn(control_loop(source.clone(), channel.clone(), config).run(rx));

    for _ in 0..200 {
        if channel.count().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // frame 6 is below watermark 4 plus interval 4
    source.push(vec![sample("R1", 10.0, 1, 2.0, 6)]).await;
    tokio::time::sleep(Duration::from_millis(40)).await;
    tx.send(()).unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(summary.cycles, 1);
    assert_eq!(summary.watermark, 4);
}

#[tokio::test]
async fn test_channel_failure_ends_loop_with_error() {
    let source = Arc::new(MemoryTelemetrySource::with_samples(r1_samples(1)));
    let channel = Arc::new(MemoryChannel::failing());
    let health = HealthRegistry::new();
    let control = ControlLoopBuilder::new()
        .source(source)
        .channel(channel)
        .config(fast_config())
        .health(health.clone())
        .build()
        .unwrap();

    let (_tx, rx) = broadcast::channel(1);
    let err = control.run(rx).await.unwrap_err();

    assert!(err.to_string().contains("APOLLO_MODELS"));
    assert_eq!(
        health.component(components::PUBLISHER).await.unwrap().status,
        ComponentStatus::Unhealthy
    );
    assert!(!health.readiness().await.ready);
}

#[tokio::test]
async fn test_telemetry_failure_propagates() {
    let channel = Arc::new(MemoryChannel::new());
    let health = HealthRegistry::new();
    let control = ControlLoopBuilder::new()
        .source(Arc::new(FailingSource))
        .channel(channel.clone())
        .config(fast_config())
        .health(health.clone())
        .build()
        .unwrap();

    let (_tx, rx) = broadcast::channel(1);
    assert!(control.run(rx).await.is_err());
    assert_eq!(channel.count().await, 0);
    assert_eq!(
        health.component(components::TELEMETRY).await.unwrap().status,
        ComponentStatus::Unhealthy
    );
}

#[tokio::test]
async fn test_artifacts_written_per_step() {
    let temp_dir = TempDir::new().unwrap();
    let source = Arc::new(MemoryTelemetrySource::with_samples(r1_samples(1)));
    let channel = Arc::new(MemoryChannel::new());
    let config = ControlConfig {
        artifact_dir: Some(temp_dir.path().to_path_buf()),
        codegen: Some(CodegenSettings {
            kind: crate::codegen::DecisionKind::Policy,
            class_names: vec![
                "SEQ_SEGIT SEQ_EXEC".to_string(),
                "OMP_SEGIT OMP_PARALLEL".to_string(),
            ],
            derived: Default::default(),
        }),
        ..fast_config()
    };
    let mut control = control_loop(source, channel, config);

    control.run_cycle(1).await.unwrap();

    let bundle_text =
        std::fs::read_to_string(temp_dir.path().join("step.0.bundle.json")).unwrap();
    let bundle = ModelBundle::from_json(&bundle_text).unwrap();
    assert_eq!(bundle.trained_regions(), vec!["R1"]);

    let code = std::fs::read_to_string(temp_dir.path().join("step.0.R1.inc")).unwrap();
    assert!(code.contains("const int size = __ctx.get_int(\"size\");"));
    assert!(code.contains("if ( size <= 55.0000 ) {"));
    assert!(code.contains("RAJA::omp_parallel_for_exec"));

    let table: BTreeMap<String, String> = serde_json::from_str(
        &std::fs::read_to_string(temp_dir.path().join("step.0.regions.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(table["0"], "R1");
    assert_eq!(table["1"], FALLBACK_REGION);
}

#[tokio::test]
async fn test_region_code_file_name_is_sanitized() {
    let temp_dir = TempDir::new().unwrap();
    let artifacts = temp_dir.path().join("artifacts");
    let source = Arc::new(MemoryTelemetrySource::with_samples(vec![
        sample("../R9", 10.0, 0, 5.0, 1),
        sample("../R9", 100.0, 1, 2.0, 1),
    ]));
    let config = ControlConfig {
        artifact_dir: Some(artifacts.clone()),
        codegen: Some(CodegenSettings {
            kind: crate::codegen::DecisionKind::ThreadCount,
            class_names: vec!["4".to_string(), "16".to_string()],
            derived: Default::default(),
        }),
        ..fast_config()
    };
    let mut control = control_loop(source, Arc::new(MemoryChannel::new()), config);

    control.run_cycle(1).await.unwrap();

    let code = std::fs::read_to_string(artifacts.join("step.0.___R9.inc")).unwrap();
    assert!(code.contains("omp_set_num_threads(16);"));
    assert!(!temp_dir.path().join("R9.inc").exists());
}

#[tokio::test]
async fn test_health_degraded_on_coverage_gap() {
    let source = Arc::new(MemoryTelemetrySource::with_samples(vec![sample(
        "R2", 7.0, 0, 1.0, 1,
    )]));
    let health = HealthRegistry::new();
    let mut control = ControlLoopBuilder::new()
        .source(source)
        .channel(Arc::new(MemoryChannel::new()))
        .config(fast_config())
        .health(health.clone())
        .build()
        .unwrap();

    control.run_cycle(1).await.unwrap();

    assert_eq!(
        health.component(components::TRAINER).await.unwrap().status,
        ComponentStatus::Degraded
    );
    assert!(health.readiness().await.ready);
}
