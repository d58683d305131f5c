//! Runtime trigger channels
//!
//! A published bundle is handed to a named channel as a length-prefixed
//! payload. Implementations decide where the bytes go.

mod directory;

pub use directory::{DirectoryChannel, DirectoryChannelConfig, PublishedBundle};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Name usable as a single path component; anything but `[A-Za-z0-9_-]` becomes `_`
pub(crate) fn file_safe_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Default trigger channel the runtime listens on
pub const DEFAULT_CHANNEL: &str = "APOLLO_MODELS";

/// One trigger sent to the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerMessage {
    pub channel: String,
    /// Payload length in bytes
    pub len: usize,
    pub payload: Vec<u8>,
}

impl TriggerMessage {
    pub fn new(channel: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            channel: channel.into(),
            len: payload.len(),
            payload,
        }
    }

    /// `len` as a big-endian u64 followed by the payload bytes
    pub fn to_frame(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(8 + self.payload.len());
        frame.extend_from_slice(&(self.len as u64).to_be_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }
}

/// Trait for runtime ingestion channels
#[async_trait]
pub trait PublishChannel: Send + Sync {
    async fn trigger(&self, message: TriggerMessage) -> Result<()>;
}

/// Channel that records every trigger in memory
#[derive(Debug, Default)]
pub struct MemoryChannel {
    sent: Mutex<Vec<TriggerMessage>>,
    fail: bool,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel whose every trigger fails
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub async fn sent(&self) -> Vec<TriggerMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

#[async_trait]
impl PublishChannel for MemoryChannel {
    async fn trigger(&self, message: TriggerMessage) -> Result<()> {
        if self.fail {
            return Err(anyhow::anyhow!(
                "Channel {} rejected trigger",
                message.channel
            ));
        }
        self.sent.lock().await.push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_safe_name() {
        assert_eq!(file_safe_name("APOLLO_MODELS"), "APOLLO_MODELS");
        assert_eq!(file_safe_name("../etc/passwd"), "___etc_passwd");
        assert_eq!(file_safe_name("loop 1.a"), "loop_1_a");
    }

    #[test]
    fn test_trigger_message_frame() {
        let msg = TriggerMessage::new(DEFAULT_CHANNEL, b"{}\n".to_vec());
        assert_eq!(msg.len, 3);

        let frame = msg.to_frame();
        assert_eq!(&frame[..8], &3u64.to_be_bytes());
        assert_eq!(&frame[8..], b"{}\n");
    }

    #[tokio::test]
    async fn test_memory_channel_records() {
        let channel = MemoryChannel::new();
        channel
            .trigger(TriggerMessage::new("models", b"abc".to_vec()))
            .await
            .unwrap();
        assert_eq!(channel.count().await, 1);
        assert_eq!(channel.sent().await[0].channel, "models");
    }

    #[tokio::test]
    async fn test_failing_channel() {
        let channel = MemoryChannel::failing();
        let result = channel.trigger(TriggerMessage::new("models", Vec::new())).await;
        assert!(result.is_err());
        assert_eq!(channel.count().await, 0);
    }
}
