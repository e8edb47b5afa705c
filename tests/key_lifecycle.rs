mod common;

use std::sync::Arc;

use common::Harness;
use sealgate::testing::{HeldPrompt, ScriptedPrompt};
use sealgate::{KeyStore, Outcome, SoftwareKeyStore, VaultError};
use tempfile::TempDir;

#[tokio::test]
async fn test_invalidated_key_refuses_open_and_keeps_record() {
    // Goal: after an enrollment change the record stays on disk but cannot be
    // opened, and no prompt is shown for it.

    let prompt = Arc::new(ScriptedPrompt::approving());
    let mut h = Harness::new(prompt.clone());
    h.vault.request_seal("pre-enrollment").await.unwrap();
    h.next_event().await;
    let before = h.stored().unwrap();

    // 1. Enrollment changes.
    assert!(h.keystore.invalidate(&h.config.key_name));

    // 2. Open is refused up front.
    let presented = prompt.presentations();
    assert!(matches!(
        h.vault.request_open().await,
        Err(VaultError::InvalidatedKey)
    ));
    assert_eq!(prompt.presentations(), presented);

    // 3. Seal is refused too, and the record is untouched.
    assert!(matches!(
        h.vault.request_seal("replacement").await,
        Err(VaultError::InvalidatedKey)
    ));
    assert_eq!(h.stored(), Some(before));

    let state = h.vault.state().await.unwrap();
    assert!(state.key_present);
    assert!(state.sealed_record_present);
}

#[tokio::test]
async fn test_reset_recovers_from_invalidated_key() {
    let mut h = Harness::new(Arc::new(ScriptedPrompt::approving()));
    h.vault.request_seal("old-secret").await.unwrap();
    h.next_event().await;
    h.keystore.invalidate(&h.config.key_name);

    // 1. Reset removes both the key and the record.
    h.vault.reset().await.unwrap();
    let state = h.vault.state().await.unwrap();
    assert!(!state.key_present);
    assert!(!state.sealed_record_present);
    assert!(matches!(
        h.vault.request_open().await,
        Err(VaultError::NothingToOpen)
    ));

    // 2. The next seal creates a fresh key and works end to end.
    h.vault.request_seal("new-secret").await.unwrap();
    assert_eq!(h.next_event().await.data.as_deref(), Some("new-secret"));
    h.vault.request_open().await.unwrap();
    assert_eq!(h.next_event().await.data.as_deref(), Some("new-secret"));
}

#[tokio::test]
async fn test_invalidated_between_approval_and_cipher() {
    // The key can be invalidated while the prompt is up. The cipher then
    // fails after approval, and the caller hears about it.

    let prompt = Arc::new(HeldPrompt::new());
    let mut h = Harness::new(prompt.clone());
    h.vault.request_seal("racing").await.unwrap();
    prompt.next_request().await.unwrap().approve();
    h.next_event().await;

    h.vault.request_open().await.unwrap();
    let responder = prompt.next_request().await.unwrap();
    h.keystore.invalidate(&h.config.key_name);
    responder.approve();

    let event = h.next_event().await;
    assert_eq!(event.outcome, Outcome::Failed);
    assert_eq!(event.reason.as_deref(), Some("invalidated_key"));
    assert!(h.stored().is_some());
}

#[tokio::test]
async fn test_record_without_key_is_key_unavailable() {
    // A record left over from a previous install, with the key gone.

    let mut first = Harness::with_parts(
        Arc::new(ScriptedPrompt::approving()),
        Arc::new(SoftwareKeyStore::new()),
        TempDir::new().unwrap(),
    );
    first.vault.request_seal("orphaned").await.unwrap();
    first.next_event().await;
    let Harness { dir, .. } = first;

    // A fresh keystore over the same directory.
    let prompt = Arc::new(ScriptedPrompt::approving());
    let second = Harness::with_parts(prompt.clone(), Arc::new(SoftwareKeyStore::new()), dir);

    assert!(matches!(
        second.vault.request_open().await,
        Err(VaultError::KeyUnavailable(_))
    ));
    assert_eq!(prompt.presentations(), 0);
    assert!(second.stored().is_some());
}

#[tokio::test]
async fn test_no_secure_hardware_refuses_seal() {
    let prompt = Arc::new(ScriptedPrompt::approving());
    let keystore = Arc::new(SoftwareKeyStore::new());
    keystore.set_hardware_available(false);
    let h = Harness::with_parts(prompt.clone(), keystore, TempDir::new().unwrap());

    assert!(matches!(
        h.vault.request_seal("no-hardware").await,
        Err(VaultError::KeyUnavailable(_))
    ));
    assert_eq!(prompt.presentations(), 0);
    assert!(!h.keystore.key_exists(&h.config.key_name));
    assert!(h.stored().is_none());
}

#[tokio::test]
async fn test_seal_reuses_existing_key() {
    let mut h = Harness::new(Arc::new(ScriptedPrompt::approving()));

    h.vault.request_seal("first").await.unwrap();
    h.next_event().await;
    h.vault.request_seal("second").await.unwrap();
    h.next_event().await;

    // The first key is still the one in use: opening the second record works.
    h.vault.request_open().await.unwrap();
    assert_eq!(h.next_event().await.data.as_deref(), Some("second"));
}

#[tokio::test]
async fn test_deleted_key_never_prompts_for_old_record() {
    // Goal: once the key that sealed a record is gone, a new key must not be
    // tried against that record behind a biometric prompt.

    let prompt = Arc::new(ScriptedPrompt::approving());
    let mut h = Harness::new(prompt.clone());
    h.vault.request_seal("old").await.unwrap();
    h.next_event().await;

    // 1. The platform deletes the key.
    h.keystore.delete_key(&h.config.key_name).unwrap();

    // 2. A seal generates a fresh key but the user cancels it.
    prompt.push(sealgate::PromptOutcome::Cancelled);
    h.vault.request_seal("new").await.unwrap();
    assert_eq!(h.next_event().await.outcome, Outcome::Cancelled);
    assert!(h.stored().is_none(), "orphaned record must be cleared");

    // 3. Open has nothing to offer and shows no prompt.
    let presented = prompt.presentations();
    assert!(matches!(
        h.vault.request_open().await,
        Err(VaultError::NothingToOpen)
    ));
    assert_eq!(prompt.presentations(), presented);
}
