//! The vault controller.
//!
//! The controller is the single owner of vault state. It runs as one tokio
//! task and processes, strictly one at a time:
//!
//! 1. requests from [`VaultHandle`]s (seal, open, state, reset, audit), and
//! 2. gate outcomes, marshalled back from the task awaiting the prompt.
//!
//! At most one operation is pending at a time. A second seal or open while
//! one is pending is rejected with [`VaultError::OperationInProgress`]. Each
//! pending operation carries a ticket, and a gate outcome is only applied if
//! its ticket matches the pending one, so a late approval can never be routed
//! into the wrong flow.
//!
//! Requests return an [`Ack`] as soon as the prompt is up. The terminal
//! result goes to the [`NotificationSink`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use crate::audit::{AuditLog, AuditRecord, AuditSink, Operation};
use crate::cipher::{CipherContext, CipherFactory};
use crate::config::VaultConfig;
use crate::error::{VaultError, VaultResult};
use crate::gate::{BiometricGate, BiometricPrompt, GateOutcome};
use crate::keys::{KeyPolicy, KeyStore};
use crate::notification::{Notification, NotificationSink, Outcome};
use crate::store::{CiphertextStore, SealedRecord};

const COMMAND_BUFFER: usize = 32;

/// Acknowledgement that a request was accepted and the prompt is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Identifies the request in logs and audit records.
    pub ticket: u64,
}

/// Snapshot of what the vault can currently do. Recomputed on every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultState {
    pub key_present: bool,
    pub sealed_record_present: bool,
    pub biometric_capable: bool,
}

/// The one operation waiting on the gate.
enum PendingOperation {
    Sealing {
        ticket: u64,
        plaintext: Zeroizing<String>,
    },
    Opening {
        ticket: u64,
        record: SealedRecord,
    },
}

impl PendingOperation {
    fn ticket(&self) -> u64 {
        match self {
            Self::Sealing { ticket, .. } | Self::Opening { ticket, .. } => *ticket,
        }
    }

    fn operation(&self) -> Operation {
        match self {
            Self::Sealing { .. } => Operation::Seal,
            Self::Opening { .. } => Operation::Open,
        }
    }
}

enum Command {
    Seal {
        plaintext: Zeroizing<String>,
        reply: oneshot::Sender<VaultResult<Ack>>,
    },
    Open {
        reply: oneshot::Sender<VaultResult<Ack>>,
    },
    State {
        reply: oneshot::Sender<VaultResult<VaultState>>,
    },
    Reset {
        reply: oneshot::Sender<VaultResult<()>>,
    },
    AuditTrail {
        reply: oneshot::Sender<VaultResult<Vec<AuditRecord>>>,
    },
}

/// A gate outcome on its way back to the controller task.
struct Resolution {
    ticket: u64,
    outcome: VaultResult<GateOutcome>,
}

/// Orchestrates keystore, cipher factory, gate, and store.
///
/// Build it with [`VaultController::new`], then [`spawn`](Self::spawn) it
/// onto the current tokio runtime to get a [`VaultHandle`].
pub struct VaultController {
    config: VaultConfig,
    keystore: Arc<dyn KeyStore>,
    ciphers: CipherFactory,
    store: Arc<dyn CiphertextStore>,
    gate: Arc<BiometricGate>,
    sink: Arc<dyn NotificationSink>,
    audit: AuditLog,
    pending: Option<PendingOperation>,
    next_ticket: u64,
}

impl VaultController {
    pub fn new(
        config: VaultConfig,
        keystore: Arc<dyn KeyStore>,
        store: Arc<dyn CiphertextStore>,
        prompt: Arc<dyn BiometricPrompt>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            ciphers: CipherFactory::new(Arc::clone(&keystore)),
            gate: Arc::new(BiometricGate::new(prompt)),
            config,
            keystore,
            store,
            sink,
            audit: AuditLog::new(),
            pending: None,
            next_ticket: 1,
        }
    }

    /// Forward every audit record to `sink` as well.
    pub fn with_audit_sink(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.audit.add_forward_sink(sink);
        self
    }

    /// Start the controller task. Must be called within a tokio runtime.
    ///
    /// The task stops once every handle is dropped and nothing is pending.
    pub fn spawn(self) -> VaultHandle {
        let (tx, commands) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(self.run(commands));
        VaultHandle { tx }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let (resolutions_tx, mut resolutions) = mpsc::unbounded_channel();
        let mut handles_gone = false;
        info!(key = %self.config.key_name, slot = %self.config.slot, "vault controller started");

        loop {
            tokio::select! {
                biased;
                Some(resolution) = resolutions.recv() => {
                    self.resolve(resolution);
                }
                command = commands.recv(), if !handles_gone => match command {
                    Some(command) => self.handle(command, &resolutions_tx),
                    None => handles_gone = true,
                },
            }
            if handles_gone && self.pending.is_none() {
                break;
            }
        }
        info!("vault controller stopped");
    }

    fn handle(&mut self, command: Command, resolutions: &mpsc::UnboundedSender<Resolution>) {
        match command {
            Command::Seal { plaintext, reply } => {
                let result = self.begin_seal(plaintext, resolutions);
                if let Err(e) = &result {
                    self.reject(Operation::Seal, e);
                }
                let _ = reply.send(result);
            }
            Command::Open { reply } => {
                let result = self.begin_open(resolutions);
                if let Err(e) = &result {
                    self.reject(Operation::Open, e);
                }
                let _ = reply.send(result);
            }
            Command::State { reply } => {
                let _ = reply.send(self.state());
            }
            Command::Reset { reply } => {
                let result = self.reset();
                let outcome = match &result {
                    Ok(()) => "success",
                    Err(e) => e.code(),
                };
                self.audit.append(AuditRecord::now(Operation::Reset, 0, outcome));
                let _ = reply.send(result);
            }
            Command::AuditTrail { reply } => {
                let _ = reply.send(Ok(self.audit.iter().cloned().collect()));
            }
        }
    }

    fn ensure_idle(&self) -> VaultResult<()> {
        match &self.pending {
            Some(_) => Err(VaultError::OperationInProgress),
            None => Ok(()),
        }
    }

    fn ensure_capable(&self) -> VaultResult<()> {
        if self.gate.can_authenticate() {
            Ok(())
        } else {
            Err(VaultError::BiometricUnavailable)
        }
    }

    fn issue_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    fn begin_seal(
        &mut self,
        plaintext: Zeroizing<String>,
        resolutions: &mpsc::UnboundedSender<Resolution>,
    ) -> VaultResult<Ack> {
        self.ensure_idle()?;
        self.ensure_capable()?;
        self.discard_orphaned_record()?;

        let key = self
            .keystore
            .ensure_key(&self.config.key_name, &KeyPolicy::default())?;
        let cipher = self.ciphers.for_seal(key)?;

        let ticket = self.issue_ticket();
        info!(ticket, "seal requested");
        self.pending = Some(PendingOperation::Sealing { ticket, plaintext });
        self.present(ticket, cipher, resolutions);
        Ok(Ack { ticket })
    }

    /// A record whose key is gone can never be opened again. Drop it before
    /// a new key is generated, or the new key would be tried against it.
    fn discard_orphaned_record(&self) -> VaultResult<()> {
        if self.keystore.key_exists(&self.config.key_name) {
            return Ok(());
        }
        if self.store.contains(&self.config.slot)? {
            warn!(slot = %self.config.slot, "clearing sealed record orphaned by a deleted key");
            self.store.clear(&self.config.slot)?;
        }
        Ok(())
    }

    fn begin_open(&mut self, resolutions: &mpsc::UnboundedSender<Resolution>) -> VaultResult<Ack> {
        self.ensure_idle()?;

        // Never prompt with nothing to open.
        let record = self
            .store
            .get(&self.config.slot)?
            .ok_or(VaultError::NothingToOpen)?;
        if !self.keystore.key_exists(&self.config.key_name) {
            return Err(VaultError::KeyUnavailable(
                "stored record has no key to open it".into(),
            ));
        }
        self.ensure_capable()?;

        let key = self
            .keystore
            .ensure_key(&self.config.key_name, &KeyPolicy::default())?;
        let cipher = self.ciphers.for_open(key, &record.nonce)?;

        let ticket = self.issue_ticket();
        info!(ticket, "open requested");
        self.pending = Some(PendingOperation::Opening { ticket, record });
        self.present(ticket, cipher, resolutions);
        Ok(Ack { ticket })
    }

    /// Show the prompt on a separate task; the outcome comes back through
    /// `resolutions` and is applied by the controller task.
    fn present(
        &self,
        ticket: u64,
        cipher: CipherContext,
        resolutions: &mpsc::UnboundedSender<Resolution>,
    ) {
        let gate = Arc::clone(&self.gate);
        let info = self.config.prompt.clone();
        let resolutions = resolutions.clone();
        tokio::spawn(async move {
            let outcome = gate.present(&info, cipher).await;
            let _ = resolutions.send(Resolution { ticket, outcome });
        });
    }

    fn resolve(&mut self, resolution: Resolution) {
        let Resolution { ticket, outcome } = resolution;
        let pending = match self.pending.take() {
            Some(pending) if pending.ticket() == ticket => pending,
            other => {
                warn!(ticket, "discarding gate outcome for a request that is not pending");
                self.pending = other;
                return;
            }
        };
        let operation = pending.operation();

        let notification = match outcome {
            Ok(GateOutcome::Approved(cipher)) => match pending {
                PendingOperation::Sealing { plaintext, .. } => self.finish_seal(cipher, plaintext),
                PendingOperation::Opening { record, .. } => self.finish_open(cipher, &record),
            },
            Ok(GateOutcome::Cancelled) => Notification::cancelled(),
            Ok(GateOutcome::Failed(reason)) => Notification::from(&reason),
            Err(e) => Notification::from(&e),
        };

        let outcome = match notification.outcome {
            Outcome::Success => "success",
            Outcome::Cancelled => "cancelled",
            Outcome::Failed => notification.reason.as_deref().unwrap_or("failed"),
        };
        info!(ticket, ?operation, outcome, "vault operation finished");
        self.audit.append(AuditRecord::now(operation, ticket, outcome));
        self.sink.deliver(notification);
    }

    /// Seal, persist, then report. Success is only reported once the record
    /// is durable.
    fn finish_seal(&self, cipher: CipherContext, plaintext: Zeroizing<String>) -> Notification {
        let stored = cipher
            .seal(plaintext.as_bytes())
            .and_then(|record| self.store.put(&self.config.slot, &record));
        match stored {
            Ok(()) => Notification::success(plaintext.as_str()),
            Err(e) => {
                error!(reason = e.code(), "seal failed after approval");
                Notification::from(&e)
            }
        }
    }

    fn finish_open(&self, cipher: CipherContext, record: &SealedRecord) -> Notification {
        let opened = cipher.open(&record.ciphertext).and_then(|bytes| {
            String::from_utf8(bytes.to_vec())
                .map(Zeroizing::new)
                .map_err(|_| VaultError::CorruptedRecord("plaintext is not UTF-8".into()))
        });
        match opened {
            Ok(plaintext) => Notification::success(plaintext.as_str()),
            Err(e) => {
                error!(reason = e.code(), "open failed after approval");
                Notification::from(&e)
            }
        }
    }

    fn reject(&mut self, operation: Operation, err: &VaultError) {
        warn!(?operation, reason = err.code(), "request rejected");
        self.audit.append(AuditRecord::now(operation, 0, err.code()));
    }

    fn state(&self) -> VaultResult<VaultState> {
        Ok(VaultState {
            key_present: self.keystore.key_exists(&self.config.key_name),
            sealed_record_present: self.store.contains(&self.config.slot)?,
            biometric_capable: self.gate.can_authenticate(),
        })
    }

    fn reset(&mut self) -> VaultResult<()> {
        self.ensure_idle()?;
        self.store.clear(&self.config.slot)?;
        self.keystore.delete_key(&self.config.key_name)?;
        info!(slot = %self.config.slot, "vault reset");
        Ok(())
    }
}

/// Cheap, cloneable access to a running [`VaultController`].
#[derive(Clone)]
pub struct VaultHandle {
    tx: mpsc::Sender<Command>,
}

impl VaultHandle {
    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<VaultResult<T>>) -> Command,
    ) -> VaultResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| VaultError::ControllerClosed)?;
        rx.await.map_err(|_| VaultError::ControllerClosed)?
    }

    /// Ask to seal `plaintext`. On `Ok` the prompt is showing and the result
    /// will arrive as a notification.
    pub async fn request_seal(&self, plaintext: impl Into<String>) -> VaultResult<Ack> {
        let plaintext = Zeroizing::new(plaintext.into());
        self.call(|reply| Command::Seal { plaintext, reply }).await
    }

    /// Ask to open the stored record. On `Ok` the prompt is showing and the
    /// result will arrive as a notification.
    pub async fn request_open(&self) -> VaultResult<Ack> {
        self.call(|reply| Command::Open { reply }).await
    }

    pub async fn state(&self) -> VaultResult<VaultState> {
        self.call(|reply| Command::State { reply }).await
    }

    /// Delete the stored record and the key. The recovery path after
    /// [`VaultError::InvalidatedKey`]; the next seal creates a fresh key.
    pub async fn reset(&self) -> VaultResult<()> {
        self.call(|reply| Command::Reset { reply }).await
    }

    /// Every audit record so far, oldest first.
    pub async fn audit_trail(&self) -> VaultResult<Vec<AuditRecord>> {
        self.call(|reply| Command::AuditTrail { reply }).await
    }
}
