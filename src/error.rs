//! Error types for sealgate.
//!
//! Every variant is a distinct failure mode of the vault. Messages are
//! intentionally minimal: they say *what* failed without echoing key
//! material, nonces, or plaintext. Only [`VaultError::code`] and
//! [`FailureReason::code`] ever cross the bridge to the untrusted caller.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The single error type for all sealgate operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The keystore cannot produce or use the key. May be permanent for this
    /// device (no secure hardware, constraint set rejected, key deleted).
    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    /// The key was invalidated after the stored record was sealed, typically
    /// by a change in enrolled biometrics. The record is permanently
    /// unopenable; the only recovery is to reset and reseal.
    #[error("key invalidated")]
    InvalidatedKey,

    /// A nonce had the wrong length or format.
    #[error("malformed nonce: expected {expected} bytes, found {found}")]
    MalformedNonce {
        /// Required nonce length.
        expected: usize,
        /// Length actually supplied.
        found: usize,
    },

    /// Open was requested but no sealed record exists.
    #[error("nothing to open")]
    NothingToOpen,

    /// A request arrived while another operation was still pending.
    #[error("another vault operation is in progress")]
    OperationInProgress,

    /// The device cannot perform strong biometric verification.
    #[error("biometric verification unavailable")]
    BiometricUnavailable,

    /// Encryption failed inside the keystore.
    #[error("encryption failed")]
    EncryptionFailure,

    /// Decryption failed: wrong key, wrong nonce, or tampered ciphertext.
    #[error("decryption failed")]
    DecryptionFailure,

    /// The system's random number generator failed to produce bytes.
    #[error("randomness source failed")]
    RandomnessFailure,

    /// A cipher context was used before the gate approved it.
    #[error("cipher context not authorized")]
    CipherNotAuthorized,

    /// A seal context was asked to open, or the reverse.
    #[error("cipher context mode mismatch")]
    ModeMismatch,

    /// `present` was called on a gate that is already presenting.
    #[error("biometric gate already presenting")]
    GateBusy,

    /// A slot name that cannot be used as a storage address.
    #[error("invalid slot name: {0:?}")]
    InvalidSlot(String),

    /// A persisted record could not be decoded.
    #[error("corrupted sealed record: {0}")]
    CorruptedRecord(String),

    /// Durable storage I/O failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The controller task is gone; no further requests can be served.
    #[error("vault controller has shut down")]
    ControllerClosed,
}

impl VaultError {
    /// Stable reason code delivered to the caller in failure notifications.
    pub fn code(&self) -> &'static str {
        match self {
            Self::KeyUnavailable(_) => "key_unavailable",
            Self::InvalidatedKey => "invalidated_key",
            Self::MalformedNonce { .. } => "malformed_nonce",
            Self::NothingToOpen => "nothing_to_open",
            Self::OperationInProgress => "operation_in_progress",
            Self::BiometricUnavailable => "biometric_unavailable",
            Self::EncryptionFailure => "encryption_failed",
            Self::DecryptionFailure => "decryption_failed",
            Self::RandomnessFailure => "randomness_failed",
            Self::CipherNotAuthorized => "cipher_not_authorized",
            Self::ModeMismatch => "mode_mismatch",
            Self::GateBusy => "gate_busy",
            Self::InvalidSlot(_) => "invalid_slot",
            Self::CorruptedRecord(_) => "corrupted_record",
            Self::Io(_) => "storage_error",
            Self::Serialization(_) => "storage_error",
            Self::ControllerClosed => "controller_closed",
        }
    }
}

/// Result alias used throughout the crate.
pub type VaultResult<T> = Result<T, VaultError>;

/// Why a biometric verification ended in failure.
///
/// Cancellation is not a failure; see `GateOutcome::Cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The presented biometric did not match.
    NotRecognized,
    /// Too many attempts; temporarily locked out.
    Lockout,
    /// Too many attempts; locked out until the device credential is used.
    LockoutPermanent,
    /// The sensor or secure hardware reported an error.
    HardwareUnavailable,
    /// No biometrics are enrolled.
    NoneEnrolled,
    /// The prompt went away without reporting a result.
    PromptClosed,
    /// Any other platform error, with the platform's description.
    Platform(String),
}

impl FailureReason {
    /// Stable reason code delivered to the caller.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotRecognized => "not_recognized",
            Self::Lockout => "lockout",
            Self::LockoutPermanent => "lockout_permanent",
            Self::HardwareUnavailable => "hardware_unavailable",
            Self::NoneEnrolled => "none_enrolled",
            Self::PromptClosed => "prompt_closed",
            Self::Platform(_) => "platform_error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Platform(message) => write!(f, "platform error: {message}"),
            other => f.write_str(other.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_do_not_leak_detail() {
        let err = VaultError::KeyUnavailable("secure element rejected policy".into());
        assert_eq!(err.code(), "key_unavailable");

        let reason = FailureReason::Platform("sensor 0x3f timeout".into());
        assert_eq!(reason.code(), "platform_error");
        assert!(reason.to_string().contains("sensor 0x3f timeout"));
    }

    #[test]
    fn test_malformed_nonce_display() {
        let err = VaultError::MalformedNonce {
            expected: 12,
            found: 11,
        };
        assert_eq!(err.to_string(), "malformed nonce: expected 12 bytes, found 11");
    }
}
