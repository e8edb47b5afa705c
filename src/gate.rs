//! The biometric gate.
//!
//! Per request the gate runs
//! `Idle -> Presenting -> {Approved(cipher) | Cancelled | Failed(reason)} -> Idle`.
//!
//! The platform side is a [`BiometricPrompt`]: it shows its verification UI
//! and later, from whatever thread it likes, resolves the
//! [`PromptResponder`] it was given. [`BiometricGate::present`] suspends on
//! that responder and turns the result into a [`GateOutcome`]. On approval
//! the very cipher context that was passed in comes back, now authorized.
//!
//! The gate imposes no timeout. The platform prompt owns its dismissal.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::cipher::{CipherContext, Mode};
use crate::error::{FailureReason, VaultError, VaultResult};

/// Text shown by the verification prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptInfo {
    pub title: String,
    pub subtitle: String,
    /// Label of the dismiss button.
    pub negative_button: String,
}

impl Default for PromptInfo {
    fn default() -> Self {
        Self {
            title: "Biometric login".to_string(),
            subtitle: "Confirm your identity to continue".to_string(),
            negative_button: "Cancel".to_string(),
        }
    }
}

/// What the prompt is being asked to unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CryptoBinding {
    /// Id of the cipher context the verification unlocks.
    pub context_id: Uuid,
    pub mode: Mode,
}

/// Terminal result reported by the platform prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    Verified,
    Cancelled,
    Failed(FailureReason),
}

/// One-shot completion handle given to the platform prompt.
///
/// Exactly one of `approve`, `cancel`, `fail` (or `resolve`) may be called;
/// each consumes the responder. Dropping it unresolved reports
/// [`FailureReason::PromptClosed`]. Safe to resolve from any thread.
#[derive(Debug)]
pub struct PromptResponder {
    tx: oneshot::Sender<PromptOutcome>,
    binding: CryptoBinding,
}

impl PromptResponder {
    pub fn binding(&self) -> CryptoBinding {
        self.binding
    }

    pub fn approve(self) {
        self.resolve(PromptOutcome::Verified);
    }

    pub fn cancel(self) {
        self.resolve(PromptOutcome::Cancelled);
    }

    pub fn fail(self, reason: FailureReason) {
        self.resolve(PromptOutcome::Failed(reason));
    }

    pub fn resolve(self, outcome: PromptOutcome) {
        if self.tx.send(outcome).is_err() {
            debug!(context_id = %self.binding.context_id, "gate stopped waiting before prompt resolved");
        }
    }
}

/// The platform's verification UI.
pub trait BiometricPrompt: Send + Sync {
    /// Whether strong biometric verification is available right now.
    fn can_authenticate(&self) -> bool;

    /// Show the prompt and return immediately. The outcome is delivered
    /// later through `responder`.
    fn authenticate(&self, info: &PromptInfo, responder: PromptResponder);
}

/// Result of presenting the gate.
#[derive(Debug)]
pub enum GateOutcome {
    /// The user verified; the context is now usable.
    Approved(CipherContext),
    /// The user dismissed the prompt.
    Cancelled,
    /// Verification failed or the hardware errored.
    Failed(FailureReason),
}

impl GateOutcome {
    /// Short label for logs and audit records.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Approved(_) => "approved",
            Self::Cancelled => "cancelled",
            Self::Failed(reason) => reason.code(),
        }
    }
}

/// Observable gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    /// Presenting for the cipher context with this id.
    Presenting(Uuid),
}

/// Presents a [`BiometricPrompt`] bound to one cipher context at a time.
pub struct BiometricGate {
    prompt: Arc<dyn BiometricPrompt>,
    state: Mutex<GateState>,
}

/// Returns the gate to `Idle` however `present` ends, including when its
/// future is dropped mid-wait.
struct Presenting<'a> {
    state: &'a Mutex<GateState>,
}

impl Drop for Presenting<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = GateState::Idle;
    }
}

impl BiometricGate {
    pub fn new(prompt: Arc<dyn BiometricPrompt>) -> Self {
        Self {
            prompt,
            state: Mutex::new(GateState::Idle),
        }
    }

    pub fn can_authenticate(&self) -> bool {
        self.prompt.can_authenticate()
    }

    pub fn state(&self) -> GateState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, context_id: Uuid) -> VaultResult<Presenting<'_>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let GateState::Presenting(current) = *state {
            error!(%current, requested = %context_id, "gate presented while already presenting");
            return Err(VaultError::GateBusy);
        }
        *state = GateState::Presenting(context_id);
        Ok(Presenting { state: &self.state })
    }

    /// Show the prompt bound to `cipher` and wait for its terminal event.
    ///
    /// Calling this while the gate is already presenting is a programming
    /// error and fails with [`VaultError::GateBusy`]; the in-flight
    /// presentation is unaffected.
    pub async fn present(
        &self,
        info: &PromptInfo,
        mut cipher: CipherContext,
    ) -> VaultResult<GateOutcome> {
        let binding = CryptoBinding {
            context_id: cipher.id(),
            mode: cipher.mode(),
        };
        let _presenting = self.enter(binding.context_id)?;

        let (tx, rx) = oneshot::channel();
        info!(context_id = %binding.context_id, mode = ?binding.mode, "presenting biometric prompt");
        self.prompt.authenticate(info, PromptResponder { tx, binding });

        let outcome = rx
            .await
            .unwrap_or(PromptOutcome::Failed(FailureReason::PromptClosed));

        let outcome = match outcome {
            PromptOutcome::Verified => {
                cipher.authorize();
                GateOutcome::Approved(cipher)
            }
            PromptOutcome::Cancelled => GateOutcome::Cancelled,
            PromptOutcome::Failed(reason) => GateOutcome::Failed(reason),
        };
        debug!(context_id = %binding.context_id, outcome = outcome.label(), "prompt resolved");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::CipherFactory;
    use crate::keys::{KeyPolicy, KeyStore, SoftwareKeyStore};
    use crate::testing::{HeldPrompt, ScriptedPrompt};

    fn seal_context() -> CipherContext {
        let keystore = Arc::new(SoftwareKeyStore::new());
        let key = keystore.ensure_key("k", &KeyPolicy::default()).unwrap();
        CipherFactory::new(keystore).for_seal(key).unwrap()
    }

    #[tokio::test]
    async fn test_approved_returns_authorized_context() {
        let gate = BiometricGate::new(Arc::new(ScriptedPrompt::approving()));
        let ctx = seal_context();
        let id = ctx.id();

        match gate.present(&PromptInfo::default(), ctx).await.unwrap() {
            GateOutcome::Approved(ctx) => {
                assert_eq!(ctx.id(), id);
                assert!(ctx.is_authorized());
            }
            other => panic!("expected approval, got {other:?}"),
        }
        assert_eq!(gate.state(), GateState::Idle);
    }

    #[tokio::test]
    async fn test_cancel_and_fail() {
        let prompt = Arc::new(ScriptedPrompt::approving());
        prompt.push(PromptOutcome::Cancelled);
        prompt.push(PromptOutcome::Failed(FailureReason::Lockout));
        let gate = BiometricGate::new(prompt);

        assert!(matches!(
            gate.present(&PromptInfo::default(), seal_context()).await.unwrap(),
            GateOutcome::Cancelled
        ));
        assert!(matches!(
            gate.present(&PromptInfo::default(), seal_context()).await.unwrap(),
            GateOutcome::Failed(FailureReason::Lockout)
        ));
    }

    #[tokio::test]
    async fn test_dropped_responder_is_prompt_closed() {
        let prompt = Arc::new(HeldPrompt::new());
        let gate = Arc::new(BiometricGate::new(prompt.clone()));

        let waiting = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move { gate.present(&PromptInfo::default(), seal_context()).await }
        });
        drop(prompt.next_request().await.unwrap());

        assert!(matches!(
            waiting.await.unwrap().unwrap(),
            GateOutcome::Failed(FailureReason::PromptClosed)
        ));
    }

    #[tokio::test]
    async fn test_reentrant_present_is_rejected() {
        let prompt = Arc::new(HeldPrompt::new());
        let gate = Arc::new(BiometricGate::new(prompt.clone()));

        let first = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move { gate.present(&PromptInfo::default(), seal_context()).await }
        });
        let responder = prompt.next_request().await.unwrap();
        assert!(matches!(gate.state(), GateState::Presenting(_)));

        assert!(matches!(
            gate.present(&PromptInfo::default(), seal_context()).await,
            Err(VaultError::GateBusy)
        ));

        responder.approve();
        assert!(matches!(first.await.unwrap().unwrap(), GateOutcome::Approved(_)));
        assert_eq!(gate.state(), GateState::Idle);
    }
}
