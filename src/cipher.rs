//! Single-use cipher contexts.
//!
//! A [`CipherContext`] binds one key handle, one mode, and one nonce. It is
//! handed to the biometric gate, comes back authorized on approval, and is
//! consumed by exactly one `seal` or `open`. Reuse is impossible: both
//! operations take `self` by value.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::Nonce;
use crate::error::{VaultError, VaultResult};
use crate::keys::{KeyHandle, KeyStore};
use crate::store::SealedRecord;

/// Which direction a cipher context runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Encrypt.
    Seal,
    /// Decrypt.
    Open,
}

/// Builds cipher contexts against one keystore.
#[derive(Clone)]
pub struct CipherFactory {
    keystore: Arc<dyn KeyStore>,
}

impl CipherFactory {
    pub fn new(keystore: Arc<dyn KeyStore>) -> Self {
        Self { keystore }
    }

    /// A seal context bound to `key` and a freshly generated nonce.
    pub fn for_seal(&self, key: KeyHandle) -> VaultResult<CipherContext> {
        self.keystore.check_usable(&key)?;
        let nonce = self.keystore.fresh_nonce()?;
        Ok(CipherContext::new(Mode::Seal, nonce, key, Arc::clone(&self.keystore)))
    }

    /// An open context bound to `key` and the nonce stored with the record.
    ///
    /// Fails with [`VaultError::InvalidatedKey`] if the key was invalidated
    /// since the nonce was produced, and [`VaultError::MalformedNonce`] if
    /// `nonce` has the wrong length.
    pub fn for_open(&self, key: KeyHandle, nonce: &[u8]) -> VaultResult<CipherContext> {
        self.keystore.check_usable(&key)?;
        let nonce = Nonce::from_slice(nonce)?;
        Ok(CipherContext::new(Mode::Open, nonce, key, Arc::clone(&self.keystore)))
    }
}

/// A single-use object bound to {key handle, mode, nonce}.
pub struct CipherContext {
    id: Uuid,
    mode: Mode,
    nonce: Nonce,
    key: KeyHandle,
    keystore: Arc<dyn KeyStore>,
    authorized: bool,
}

impl CipherContext {
    fn new(mode: Mode, nonce: Nonce, key: KeyHandle, keystore: Arc<dyn KeyStore>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            nonce,
            key,
            keystore,
            authorized: false,
        }
    }

    /// Identifier the verification prompt is bound to.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    /// Whether the biometric gate has approved this context.
    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    /// Only the gate grants authorization.
    pub(crate) fn authorize(&mut self) {
        self.authorized = true;
    }

    fn ready_for(&self, mode: Mode) -> VaultResult<()> {
        if self.mode != mode {
            return Err(VaultError::ModeMismatch);
        }
        if !self.authorized {
            return Err(VaultError::CipherNotAuthorized);
        }
        Ok(())
    }

    /// Encrypt `plaintext`, consuming the context.
    pub fn seal(self, plaintext: &[u8]) -> VaultResult<SealedRecord> {
        self.ready_for(Mode::Seal)?;
        let ciphertext = self.keystore.seal(&self.key, &self.nonce, plaintext)?;
        Ok(SealedRecord::new(self.nonce, ciphertext))
    }

    /// Decrypt `ciphertext`, consuming the context.
    pub fn open(self, ciphertext: &[u8]) -> VaultResult<Zeroizing<Vec<u8>>> {
        self.ready_for(Mode::Open)?;
        let plaintext = self.keystore.open(&self.key, &self.nonce, ciphertext)?;
        Ok(Zeroizing::new(plaintext))
    }
}

impl fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherContext")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("key", &self.key.name())
            .field("authorized", &self.authorized)
            .finish()
    }
}
