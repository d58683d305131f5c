//! Filesystem trigger channel
//!
//! Each trigger writes `model_<guid>.json` under `<dir>/<channel>/`, with
//! a `.sha256` sidecar, and refreshes `latest.json`. Older bundles beyond
//! the retention count are removed.

use super::{file_safe_name, PublishChannel, TriggerMessage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Configuration for the directory channel
#[derive(Debug, Clone)]
pub struct DirectoryChannelConfig {
    /// Root directory; each channel gets a subdirectory
    pub dir: PathBuf,
    /// Number of published bundles kept on disk
    pub versions_to_keep: usize,
    /// Largest accepted payload in bytes
    pub max_payload_size: usize,
}

impl Default for DirectoryChannelConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/lib/tuner/bundles"),
            versions_to_keep: 5,
            max_payload_size: 16 * 1024 * 1024,
        }
    }
}

/// A bundle written by the channel
#[derive(Debug, Clone, Serialize)]
pub struct PublishedBundle {
    pub guid: String,
    pub path: PathBuf,
    pub checksum: String,
    pub size_bytes: usize,
    pub published_at: i64,
}

/// Channel writing bundles into a directory tree
pub struct DirectoryChannel {
    config: DirectoryChannelConfig,
    history: RwLock<Vec<PublishedBundle>>,
}

impl DirectoryChannel {
    pub fn new(config: DirectoryChannelConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)
            .with_context(|| format!("Failed to create bundle directory {:?}", config.dir))?;

        Ok(Self {
            config,
            history: RwLock::new(Vec::new()),
        })
    }

    /// Bundles still on disk, newest first
    pub async fn history(&self) -> Vec<PublishedBundle> {
        self.history.read().await.clone()
    }

    pub async fn latest(&self) -> Option<PublishedBundle> {
        self.history.read().await.first().cloned()
    }

    fn channel_dir(&self, channel: &str) -> PathBuf {
        self.config.dir.join(file_safe_name(channel))
    }
}

#[async_trait]
impl PublishChannel for DirectoryChannel {
    async fn trigger(&self, message: TriggerMessage) -> Result<()> {
        if message.len != message.payload.len() {
            return Err(anyhow::anyhow!(
                "Payload length {} does not match declared length {}",
                message.payload.len(),
                message.len
            ));
        }
        if message.len > self.config.max_payload_size {
            return Err(anyhow::anyhow!(
                "Payload size {} exceeds maximum {}",
                message.len,
                self.config.max_payload_size
            ));
        }

        let dir = self.channel_dir(&message.channel);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create channel directory {:?}", dir))?;

        let guid = payload_guid(&message.payload);
        let checksum = compute_checksum(&message.payload);
        let path = dir.join(format!("model_{}.json", guid));

        write_atomic(&path, &message.payload)?;
        write_atomic(&path.with_extension("sha256"), checksum.as_bytes())?;
        write_atomic(&dir.join("latest.json"), &message.payload)?;

        let published = PublishedBundle {
            guid: guid.clone(),
            path,
            checksum,
            size_bytes: message.len,
            published_at: chrono::Utc::now().timestamp(),
        };

        {
            let mut history = self.history.write().await;
            history.retain(|b| b.path != published.path);
            history.insert(0, published.clone());

            while history.len() > self.config.versions_to_keep {
                if let Some(removed) = history.pop() {
                    for stale in [removed.path.clone(), removed.path.with_extension("sha256")] {
                        if let Err(e) = fs::remove_file(&stale) {
                            warn!(
                                path = %stale.display(),
                                error = %e,
                                "Failed to remove old bundle file"
                            );
                        }
                    }
                }
            }
        }

        info!(
            channel = %message.channel,
            guid = %published.guid,
            size = published.size_bytes,
            checksum = %published.checksum,
            "Bundle written"
        );

        Ok(())
    }
}

/// Guid field of a bundle payload, or a timestamp when absent
fn payload_guid(payload: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(payload)
        .ok()
        .and_then(|v| v.get("guid").and_then(serde_json::Value::as_u64))
        .map(|g| g.to_string())
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis().to_string())
}

/// Write to a temp file, sync, then rename over the target
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;

    file.write_all(data).context("Failed to write bundle data")?;
    file.sync_all().context("Failed to sync bundle file")?;

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    Ok(())
}

/// Compute SHA256 checksum of data
pub(crate) fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn channel(temp_dir: &TempDir, keep: usize) -> DirectoryChannel {
        DirectoryChannel::new(DirectoryChannelConfig {
            dir: temp_dir.path().to_path_buf(),
            versions_to_keep: keep,
            ..Default::default()
        })
        .unwrap()
    }

    fn payload(guid: u64) -> Vec<u8> {
        format!("{{\"guid\": {}}}\n", guid).into_bytes()
    }

    #[test]
    fn test_compute_checksum() {
        let checksum = compute_checksum(b"bundle");
        assert_eq!(checksum.len(), 64);
        assert_eq!(checksum, compute_checksum(b"bundle"));
    }

    #[tokio::test]
    async fn test_writes_bundle_sidecar_and_latest() {
        let temp_dir = TempDir::new().unwrap();
        let channel = channel(&temp_dir, 5);

        channel
            .trigger(TriggerMessage::new("APOLLO_MODELS", payload(7)))
            .await
            .unwrap();

        let dir = temp_dir.path().join("APOLLO_MODELS");
        let written = fs::read(dir.join("model_7.json")).unwrap();
        assert_eq!(written, payload(7));
        assert_eq!(
            fs::read_to_string(dir.join("model_7.sha256")).unwrap(),
            compute_checksum(&payload(7))
        );
        assert_eq!(fs::read(dir.join("latest.json")).unwrap(), payload(7));
        assert!(!dir.join("model_7.tmp").exists());

        let latest = channel.latest().await.unwrap();
        assert_eq!(latest.guid, "7");
    }

    #[tokio::test]
    async fn test_prunes_old_bundles() {
        let temp_dir = TempDir::new().unwrap();
        let channel = channel(&temp_dir, 2);

        for guid in 1..=4 {
            channel
                .trigger(TriggerMessage::new("models", payload(guid)))
                .await
                .unwrap();
        }

        let dir = temp_dir.path().join("models");
        assert!(!dir.join("model_1.json").exists());
        assert!(!dir.join("model_2.sha256").exists());
        assert!(dir.join("model_3.json").exists());
        assert!(dir.join("model_4.json").exists());

        let guids: Vec<String> = channel.history().await.into_iter().map(|b| b.guid).collect();
        assert_eq!(guids, vec!["4", "3"]);
    }

    #[tokio::test]
    async fn test_rejects_length_mismatch_and_oversize() {
        let temp_dir = TempDir::new().unwrap();
        let channel = DirectoryChannel::new(DirectoryChannelConfig {
            dir: temp_dir.path().to_path_buf(),
            versions_to_keep: 1,
            max_payload_size: 4,
        })
        .unwrap();

        let mut msg = TriggerMessage::new("models", b"abc".to_vec());
        msg.len = 10;
        assert!(channel.trigger(msg).await.is_err());

        let msg = TriggerMessage::new("models", b"abcdef".to_vec());
        assert!(channel.trigger(msg).await.is_err());
        assert!(channel.latest().await.is_none());
    }
}
