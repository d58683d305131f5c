//! Telemetry source implementations

use super::TelemetrySource;
use crate::models::TelemetrySample;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// In-process append-only sample store
#[derive(Debug, Default)]
pub struct MemoryTelemetrySource {
    samples: RwLock<Vec<TelemetrySample>>,
}

impl MemoryTelemetrySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samples(samples: Vec<TelemetrySample>) -> Self {
        Self {
            samples: RwLock::new(samples),
        }
    }

    /// Append samples to the store
    pub async fn push(&self, batch: impl IntoIterator<Item = TelemetrySample>) {
        let mut samples = self.samples.write().await;
        samples.extend(batch);
    }

    pub async fn len(&self) -> usize {
        self.samples.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.samples.read().await.is_empty()
    }
}

#[async_trait]
impl TelemetrySource for MemoryTelemetrySource {
    async fn max_frame(&self) -> Result<u64> {
        let samples = self.samples.read().await;
        Ok(samples.iter().map(|s| s.frame).max().unwrap_or(0))
    }

    async fn fetch(&self, since: Option<u64>) -> Result<Vec<TelemetrySample>> {
        let samples = self.samples.read().await;
        Ok(filter_since(samples.iter(), since))
    }
}

/// Newline-delimited JSON file of samples, re-read on every call
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: PathBuf,
}

impl JsonLinesSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<TelemetrySample>> {
        // A store that has not been created yet simply has no frames
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            debug!(path = %self.path.display(), "Telemetry file not present yet");
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read telemetry file {:?}", self.path))?;

        parse_json_lines(&content)
            .with_context(|| format!("Failed to parse telemetry file {:?}", self.path))
    }
}

#[async_trait]
impl TelemetrySource for JsonLinesSource {
    async fn max_frame(&self) -> Result<u64> {
        let samples = self.read_all().await?;
        Ok(samples.iter().map(|s| s.frame).max().unwrap_or(0))
    }

    async fn fetch(&self, since: Option<u64>) -> Result<Vec<TelemetrySample>> {
        let samples = self.read_all().await?;
        Ok(filter_since(samples.iter(), since))
    }
}

/// Parse newline-delimited samples, skipping blank lines
pub fn parse_json_lines(content: &str) -> Result<Vec<TelemetrySample>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid sample on line {}", idx + 1))
        })
        .collect()
}

fn filter_since<'a>(
    samples: impl Iterator<Item = &'a TelemetrySample>,
    since: Option<u64>,
) -> Vec<TelemetrySample> {
    samples
        .filter(|s| since.map_or(true, |watermark| s.frame > watermark))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_source_frames_and_delta() {
        let source = MemoryTelemetrySource::new();
        assert_eq!(source.max_frame().await.unwrap(), 0);

        source
            .push(vec![
                TelemetrySample::new("R1", 0, 1.0).with_frame(1),
                TelemetrySample::new("R1", 1, 2.0).with_frame(5),
            ])
            .await;

        assert_eq!(source.max_frame().await.unwrap(), 5);
        assert_eq!(source.fetch(None).await.unwrap().len(), 2);
        assert_eq!(source.fetch(Some(1)).await.unwrap().len(), 1);
        assert!(source.fetch(Some(5)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_lines_source_reads_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("telemetry.jsonl");
        let content = r#"{"region_name":"R1","policy_index":0,"frame":3,"time_avg":5.0,"attributes":{"size":10}}

{"region_name":"R1","policy_index":1,"frame":7,"time_avg":2.0,"attributes":{"size":10}}
"#;
        tokio::fs::write(&path, content).await.unwrap();

        let source = JsonLinesSource::new(&path);
        assert_eq!(source.max_frame().await.unwrap(), 7);

        let samples = source.fetch(None).await.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].attributes["size"], 10.0);
    }

    #[tokio::test]
    async fn test_json_lines_source_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let source = JsonLinesSource::new(temp_dir.path().join("absent.jsonl"));
        assert_eq!(source.max_frame().await.unwrap(), 0);
        assert!(source.fetch(None).await.unwrap().is_empty());
    }

    #[test]
    fn test_parse_json_lines_reports_line() {
        let err = parse_json_lines("{\"region_name\":\"R1\"}\n").unwrap_err();
        assert!(format!("{:#}", err).contains("line 1"));
    }
}
