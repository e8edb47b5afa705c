//! # sealgate
//!
//! Biometric-gated credential vault.
//!
//! A short secret is sealed with a key that lives in a hardware-backed
//! keystore and can only be used after the user passes biometric
//! verification. An untrusted caller requests seal and open operations
//! through a [`Bridge`] and receives results as notifications; it never sees
//! the key.
//!
//! ```text
//! caller -> Bridge -> VaultController -> (CipherFactory + BiometricGate)
//!        -> approved -> cipher runs -> CiphertextStore (seal) / plaintext (open)
//!        -> Notification -> caller
//! ```
//!
//! ## Public API
//!
//! Platform integrations implement [`KeyStore`], [`CiphertextStore`],
//! [`BiometricPrompt`], and [`NotificationSink`]. In-memory and file-backed
//! implementations ship for tests and simple hosts.

pub mod audit;
pub mod bridge;
pub mod cipher;
pub mod config;
pub mod controller;
pub(crate) mod crypto;
pub mod error;
pub mod gate;
pub mod keys;
pub mod logging;
pub mod notification;
pub mod store;
pub mod testing;

pub use bridge::Bridge;
pub use cipher::{CipherContext, CipherFactory, Mode};
pub use config::VaultConfig;
pub use controller::{Ack, VaultController, VaultHandle, VaultState};
pub use crypto::{Nonce, NONCE_LEN};
pub use error::{FailureReason, VaultError, VaultResult};
pub use gate::{BiometricGate, BiometricPrompt, GateOutcome, PromptInfo, PromptOutcome, PromptResponder};
pub use keys::{KeyHandle, KeyPolicy, KeyStore, SoftwareKeyStore};
pub use notification::{ChannelSink, Notification, NotificationSink, Outcome};
pub use store::{CiphertextStore, FileStore, MemoryStore, SealedRecord};
