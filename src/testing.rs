//! Prompt doubles for tests, benches, and demos.
//!
//! These stand in for the platform's biometric UI. They are NOT a security
//! boundary.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::gate::{BiometricPrompt, PromptInfo, PromptOutcome, PromptResponder};

/// Resolves every prompt immediately from a script.
///
/// Queued outcomes are used first, in order; once the queue is empty every
/// prompt resolves with the default outcome.
pub struct ScriptedPrompt {
    default: PromptOutcome,
    queued: Mutex<VecDeque<PromptOutcome>>,
    presentations: AtomicUsize,
    capable: AtomicBool,
}

impl ScriptedPrompt {
    pub fn new(default: PromptOutcome) -> Self {
        Self {
            default,
            queued: Mutex::new(VecDeque::new()),
            presentations: AtomicUsize::new(0),
            capable: AtomicBool::new(true),
        }
    }

    /// A prompt the user always passes.
    pub fn approving() -> Self {
        Self::new(PromptOutcome::Verified)
    }

    /// Queue `outcome` for the next unscripted presentation.
    pub fn push(&self, outcome: PromptOutcome) {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
    }

    /// How many times the prompt has been shown.
    pub fn presentations(&self) -> usize {
        self.presentations.load(Ordering::SeqCst)
    }

    /// Simulate a device with or without strong biometrics.
    pub fn set_capable(&self, capable: bool) {
        self.capable.store(capable, Ordering::SeqCst);
    }
}

impl BiometricPrompt for ScriptedPrompt {
    fn can_authenticate(&self) -> bool {
        self.capable.load(Ordering::SeqCst)
    }

    fn authenticate(&self, _info: &PromptInfo, responder: PromptResponder) {
        self.presentations.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.default.clone());
        responder.resolve(outcome);
    }
}

/// Holds every prompt open until the test resolves it by hand.
///
/// Each presentation hands its [`PromptResponder`] to
/// [`HeldPrompt::next_request`], so a test can decide the outcome later and
/// from any task, the way a human would.
pub struct HeldPrompt {
    tx: mpsc::UnboundedSender<PromptResponder>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<PromptResponder>>,
    presentations: AtomicUsize,
}

impl HeldPrompt {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            presentations: AtomicUsize::new(0),
        }
    }

    /// Wait for the next presentation and take its responder.
    pub async fn next_request(&self) -> Option<PromptResponder> {
        self.rx.lock().await.recv().await
    }

    pub fn presentations(&self) -> usize {
        self.presentations.load(Ordering::SeqCst)
    }
}

impl Default for HeldPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl BiometricPrompt for HeldPrompt {
    fn can_authenticate(&self) -> bool {
        true
    }

    fn authenticate(&self, _info: &PromptInfo, responder: PromptResponder) {
        self.presentations.fetch_add(1, Ordering::SeqCst);
        // The receiver lives as long as `self`, so this cannot fail.
        let _ = self.tx.send(responder);
    }
}
