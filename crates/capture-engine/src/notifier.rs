//! Lifecycle notifications for external status displays.

use qamrec_common::error::{QamrecError, QamrecResult};
use qamrec_media_model::FormatDescriptor;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Point-in-time session notification.
///
/// Serialized with the message names external controllers already know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LifecycleEvent {
    #[serde(rename = "START_RECORDING")]
    Started { format: String },
    #[serde(rename = "PAUSE_RECORDING")]
    Paused { duration_ms: u64 },
    #[serde(rename = "RESUME_RECORDING")]
    Resumed { duration_ms: u64 },
    #[serde(rename = "STOP_RECORDING")]
    Stopped {
        duration_ms: u64,
        size_bytes: u64,
        format: String,
    },
}

impl LifecycleEvent {
    pub fn started(format: &FormatDescriptor) -> Self {
        Self::Started {
            format: format.mime_type.clone(),
        }
    }
}

/// Fire-and-forget sink for lifecycle events.
///
/// Errors are reported to the session, which logs and ignores them.
pub trait LifecycleNotifier: Send + Sync {
    fn notify(&self, event: &LifecycleEvent) -> QamrecResult<()>;
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl LifecycleNotifier for NullNotifier {
    fn notify(&self, _event: &LifecycleEvent) -> QamrecResult<()> {
        Ok(())
    }
}

/// Forwards events to an in-process channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelNotifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LifecycleNotifier for ChannelNotifier {
    fn notify(&self, event: &LifecycleEvent) -> QamrecResult<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| QamrecError::Other(anyhow::anyhow!("lifecycle subscriber is gone")))
    }
}

/// Writes one JSON line per event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl LifecycleNotifier for LogNotifier {
    fn notify(&self, event: &LifecycleEvent) -> QamrecResult<()> {
        let line = serde_json::to_string(event)?;
        tracing::info!(event = %line, "Lifecycle");
        Ok(())
    }
}
