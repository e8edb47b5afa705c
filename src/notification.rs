//! Messages delivered to the caller's event channel.
//!
//! Results cross the trust boundary as structured [`Notification`] values,
//! serialized with `serde_json` when the transport needs text. Payloads are
//! never spliced into script source.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{FailureReason, VaultError};

/// Terminal outcome of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Cancelled,
    Failed,
}

/// One-shot result of a seal or open request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub outcome: Outcome,
    /// Seal: the plaintext that was sealed. Open: the recovered plaintext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Reason code for failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Notification {
    pub fn success(data: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Success,
            data: Some(data.into()),
            reason: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            outcome: Outcome::Cancelled,
            data: None,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Failed,
            data: None,
            reason: Some(reason.into()),
        }
    }

    /// Serialize for a text transport.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&VaultError> for Notification {
    fn from(err: &VaultError) -> Self {
        Self::failed(err.code())
    }
}

impl From<&FailureReason> for Notification {
    fn from(reason: &FailureReason) -> Self {
        Self::failed(reason.code())
    }
}

/// The caller's event channel.
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification. Must not block for long.
    fn deliver(&self, notification: Notification);
}

/// Sink forwarding into a tokio unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    /// Create a sink and the receiver the caller reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn deliver(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            warn!("notification dropped: caller channel closed");
        }
    }
}
