//! The caller-facing bridge.
//!
//! The caller sits on the untrusted side of the boundary. It gets exactly
//! three operations and never a return value from seal or open: every
//! result, including an immediate rejection, arrives later as one
//! [`Notification`] on its event channel.

use std::sync::Arc;

use tracing::debug;

use crate::controller::VaultHandle;
use crate::notification::{Notification, NotificationSink};

/// Exposes the vault to an untrusted caller.
#[derive(Clone)]
pub struct Bridge {
    vault: VaultHandle,
    sink: Arc<dyn NotificationSink>,
    device_id: String,
}

impl Bridge {
    /// `sink` must be the same event channel the controller was built with,
    /// so that immediate rejections and late outcomes reach the caller in
    /// one place. `device_id` is supplied by the host and passed through
    /// untouched.
    pub fn new(
        vault: VaultHandle,
        sink: Arc<dyn NotificationSink>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            vault,
            sink,
            device_id: device_id.into(),
        }
    }

    /// Request that `plaintext` be sealed. The outcome is notified; on
    /// success the notification echoes `plaintext` back.
    pub async fn seal_request(&self, plaintext: String) {
        match self.vault.request_seal(plaintext).await {
            Ok(ack) => debug!(ticket = ack.ticket, "seal request accepted"),
            Err(e) => self.sink.deliver(Notification::from(&e)),
        }
    }

    /// Request that the stored secret be opened. The outcome is notified;
    /// on success the notification carries the recovered plaintext.
    pub async fn open_request(&self) {
        match self.vault.request_open().await {
            Ok(ack) => debug!(ticket = ack.ticket, "open request accepted"),
            Err(e) => self.sink.deliver(Notification::from(&e)),
        }
    }

    /// The host-supplied device identity.
    pub fn device_identity(&self) -> &str {
        &self.device_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultConfig;
    use crate::controller::VaultController;
    use crate::keys::SoftwareKeyStore;
    use crate::notification::{ChannelSink, Outcome};
    use crate::store::MemoryStore;
    use crate::testing::ScriptedPrompt;

    #[tokio::test]
    async fn test_immediate_rejection_is_notified() {
        let (sink, mut events) = ChannelSink::channel();
        let sink: Arc<dyn NotificationSink> = Arc::new(sink);
        let vault = VaultController::new(
            VaultConfig::default(),
            Arc::new(SoftwareKeyStore::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedPrompt::approving()),
            Arc::clone(&sink),
        )
        .spawn();
        let bridge = Bridge::new(vault, sink, "device-1234");

        assert_eq!(bridge.device_identity(), "device-1234");

        bridge.open_request().await;
        let event = events.recv().await.unwrap();
        assert_eq!(event.outcome, Outcome::Failed);
        assert_eq!(event.reason.as_deref(), Some("nothing_to_open"));
    }
}
