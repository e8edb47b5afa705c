//! Shared harness: a running controller over a `SoftwareKeyStore` and a
//! `FileStore` in a temporary directory.

#![allow(dead_code)]

use std::sync::Arc;

use sealgate::{
    BiometricPrompt, ChannelSink, CiphertextStore, FileStore, Notification, NotificationSink,
    SealedRecord, SoftwareKeyStore, VaultConfig, VaultController, VaultHandle,
};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

pub struct Harness {
    pub vault: VaultHandle,
    pub events: UnboundedReceiver<Notification>,
    pub sink: Arc<dyn NotificationSink>,
    pub keystore: Arc<SoftwareKeyStore>,
    pub store: Arc<FileStore>,
    pub config: VaultConfig,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(prompt: Arc<dyn BiometricPrompt>) -> Self {
        Self::with_parts(
            prompt,
            Arc::new(SoftwareKeyStore::new()),
            TempDir::new().unwrap(),
        )
    }

    pub fn with_parts(
        prompt: Arc<dyn BiometricPrompt>,
        keystore: Arc<SoftwareKeyStore>,
        dir: TempDir,
    ) -> Self {
        let config = VaultConfig {
            data_dir: dir.path().to_path_buf(),
            ..VaultConfig::default()
        };
        let store = Arc::new(FileStore::open(&config.data_dir).unwrap());
        let (sink, events) = ChannelSink::channel();
        let sink: Arc<dyn NotificationSink> = Arc::new(sink);

        let vault = VaultController::new(
            config.clone(),
            keystore.clone(),
            store.clone(),
            prompt,
            Arc::clone(&sink),
        )
        .spawn();

        Self {
            vault,
            events,
            sink,
            keystore,
            store,
            config,
            dir,
        }
    }

    pub async fn next_event(&mut self) -> Notification {
        self.events.recv().await.expect("event channel closed")
    }

    pub fn stored(&self) -> Option<SealedRecord> {
        self.store.get(&self.config.slot).unwrap()
    }

    /// Every byte persisted under the data directory.
    pub fn persisted_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for entry in std::fs::read_dir(self.dir.path()).unwrap() {
            bytes.extend(std::fs::read(entry.unwrap().path()).unwrap());
        }
        bytes
    }
}

pub fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
