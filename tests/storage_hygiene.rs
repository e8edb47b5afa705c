mod common;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{contains_subslice, Harness};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sealgate::testing::ScriptedPrompt;
use sealgate::{
    ChannelSink, CiphertextStore, FailureReason, MemoryStore, Outcome, PromptOutcome,
    SealedRecord, SoftwareKeyStore, VaultConfig, VaultController, VaultError, VaultResult,
};

#[tokio::test]
async fn test_no_plaintext_on_disk() {
    // Goal: after requestSeal(P), persisted bytes never contain P.

    let mut h = Harness::new(Arc::new(ScriptedPrompt::approving()));
    let mut rng = rand::thread_rng();

    for _ in 0..64 {
        let len = rng.gen_range(16..=96);
        let plaintext: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect();

        h.vault.request_seal(plaintext.clone()).await.unwrap();
        assert_eq!(h.next_event().await.outcome, Outcome::Success);

        let on_disk = h.persisted_bytes();
        assert!(!on_disk.is_empty());
        assert!(
            !contains_subslice(&on_disk, plaintext.as_bytes()),
            "plaintext found in persisted bytes"
        );
    }
}

#[tokio::test]
async fn test_cancelled_seal_leaves_absent_slot_absent() {
    let prompt = Arc::new(ScriptedPrompt::new(PromptOutcome::Cancelled));
    let mut h = Harness::new(prompt);

    h.vault.request_seal("never-stored").await.unwrap();
    let event = h.next_event().await;

    assert_eq!(event.outcome, Outcome::Cancelled);
    assert_eq!(event.data, None);
    assert_eq!(h.stored(), None);
    assert!(h.persisted_bytes().is_empty());
}

#[tokio::test]
async fn test_cancelled_or_failed_seal_leaves_existing_record_untouched() {
    let prompt = Arc::new(ScriptedPrompt::approving());
    let mut h = Harness::new(prompt.clone());

    // 1. Seal an initial record.
    h.vault.request_seal("original").await.unwrap();
    h.next_event().await;
    let original = h.stored().unwrap();

    // 2. A cancelled reseal changes nothing.
    prompt.push(PromptOutcome::Cancelled);
    h.vault.request_seal("replacement").await.unwrap();
    assert_eq!(h.next_event().await.outcome, Outcome::Cancelled);
    assert_eq!(h.stored(), Some(original.clone()));

    // 3. Neither does a failed one.
    prompt.push(PromptOutcome::Failed(FailureReason::NotRecognized));
    h.vault.request_seal("replacement").await.unwrap();
    let failed = h.next_event().await;
    assert_eq!(failed.outcome, Outcome::Failed);
    assert_eq!(failed.reason.as_deref(), Some("not_recognized"));
    assert_eq!(h.stored(), Some(original));

    // 4. The original still opens.
    h.vault.request_open().await.unwrap();
    assert_eq!(h.next_event().await.data.as_deref(), Some("original"));
}

#[tokio::test]
async fn test_empty_store_open_never_prompts() {
    let prompt = Arc::new(ScriptedPrompt::approving());
    let h = Harness::new(prompt.clone());

    let result = h.vault.request_open().await;

    assert!(matches!(result, Err(VaultError::NothingToOpen)));
    assert_eq!(prompt.presentations(), 0, "gate presented with nothing to open");
}

/// Store whose writes can be made to fail, like a full disk.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_puts: AtomicBool,
}

impl CiphertextStore for FlakyStore {
    fn put(&self, slot: &str, record: &SealedRecord) -> VaultResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "no space left").into());
        }
        self.inner.put(slot, record)
    }

    fn get(&self, slot: &str) -> VaultResult<Option<SealedRecord>> {
        self.inner.get(slot)
    }

    fn clear(&self, slot: &str) -> VaultResult<()> {
        self.inner.clear(slot)
    }
}

#[tokio::test]
async fn test_failed_write_is_never_reported_as_success() {
    // Goal: a seal whose write fails after approval reports storage_error,
    // never success, and leaves the previous record in place.

    let store = Arc::new(FlakyStore::default());
    let (sink, mut events) = ChannelSink::channel();
    let config = VaultConfig::default();
    let vault = VaultController::new(
        config.clone(),
        Arc::new(SoftwareKeyStore::new()),
        store.clone(),
        Arc::new(ScriptedPrompt::approving()),
        Arc::new(sink),
    )
    .spawn();

    // 1. A good seal.
    vault.request_seal("kept-record").await.unwrap();
    assert_eq!(events.recv().await.unwrap().outcome, Outcome::Success);
    let original = store.get(&config.slot).unwrap();

    // 2. The disk fills up; the next seal is approved but cannot be written.
    store.fail_puts.store(true, Ordering::SeqCst);
    vault.request_seal("lost-record").await.unwrap();
    let event = events.recv().await.unwrap();
    assert_eq!(event.outcome, Outcome::Failed);
    assert_eq!(event.reason.as_deref(), Some("storage_error"));
    assert_eq!(event.data, None);
    assert!(events.try_recv().is_err(), "exactly one notification per request");

    // 3. The previous record is untouched and still opens.
    assert_eq!(store.get(&config.slot).unwrap(), original);
    vault.request_open().await.unwrap();
    assert_eq!(events.recv().await.unwrap().data.as_deref(), Some("kept-record"));
}
