//! Key ownership and the keystore boundary.
//!
//! The symmetric key lives behind a [`KeyStore`]: on a device that is the
//! platform's hardware-backed keystore, which refuses to use the key until
//! the user has passed biometric verification. The application layer only
//! ever holds a [`KeyHandle`], an opaque reference by logical name. Raw key
//! bytes never leave the backend.
//!
//! [`SoftwareKeyStore`] is an in-memory backend with the same contract. It
//! is what tests and the demo run against, and it can simulate the two
//! irreversible platform events: no secure hardware, and key invalidation
//! after a biometric enrollment change.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, Nonce, KEY_LEN};
use crate::error::{VaultError, VaultResult};

// ---------------------------------------------------------------------------
// Handle and policy
// ---------------------------------------------------------------------------

/// Constraints the key is generated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPolicy {
    /// Every use of the key requires a fresh user verification.
    pub user_authentication_required: bool,
    /// Enrolling new biometrics permanently invalidates the key.
    pub invalidated_by_enrollment: bool,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            user_authentication_required: true,
            invalidated_by_enrollment: true,
        }
    }
}

/// Opaque reference to a key living in a [`KeyStore`].
///
/// - Not `Clone` and not serializable.
/// - Carries no key material, only the logical name and the generation of
///   the key it was issued for. A handle outlives its key if the key is
///   deleted and recreated; the backend then refuses it.
#[derive(Debug, PartialEq, Eq)]
pub struct KeyHandle {
    name: String,
    generation: u64,
}

impl KeyHandle {
    /// Build a handle. Backends call this; callers receive handles from
    /// [`KeyStore::ensure_key`].
    pub fn new(name: impl Into<String>, generation: u64) -> Self {
        Self {
            name: name.into(),
            generation,
        }
    }

    /// The logical key name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The generation of the key this handle was issued for.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

// ---------------------------------------------------------------------------
// Keystore boundary
// ---------------------------------------------------------------------------

/// Hardware-backed symmetric key storage.
///
/// Implementations must never export raw key bytes and should enforce
/// "usable only after verification" themselves where the platform allows.
/// `seal` and `open` are called by `CipherContext` only, after the biometric
/// gate has approved that context.
pub trait KeyStore: Send + Sync {
    /// Return a handle to the key called `name`, generating it under
    /// `policy` if it does not exist yet. Idempotent.
    ///
    /// Fails with [`VaultError::KeyUnavailable`] when the device has no
    /// secure hardware or rejects the constraint set.
    fn ensure_key(&self, name: &str, policy: &KeyPolicy) -> VaultResult<KeyHandle>;

    /// Whether a key called `name` exists (valid or not).
    fn key_exists(&self, name: &str) -> bool;

    /// Permanently delete the key called `name`. Deleting an absent key is
    /// not an error.
    fn delete_key(&self, name: &str) -> VaultResult<()>;

    /// Check that `key` can still be used.
    ///
    /// Fails with [`VaultError::InvalidatedKey`] if the key material was
    /// invalidated, and [`VaultError::KeyUnavailable`] if it is gone.
    fn check_usable(&self, key: &KeyHandle) -> VaultResult<()>;

    /// Produce a fresh nonce for a seal operation.
    fn fresh_nonce(&self) -> VaultResult<Nonce> {
        crypto::generate_nonce()
    }

    /// Encrypt with the key. Returns ciphertext with the tag appended.
    fn seal(&self, key: &KeyHandle, nonce: &Nonce, plaintext: &[u8]) -> VaultResult<Vec<u8>>;

    /// Decrypt with the key.
    fn open(&self, key: &KeyHandle, nonce: &Nonce, ciphertext: &[u8]) -> VaultResult<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// Software backend
// ---------------------------------------------------------------------------

#[derive(Zeroize, ZeroizeOnDrop)]
struct KeyMaterial {
    bytes: [u8; KEY_LEN],
}

struct KeyEntry {
    material: KeyMaterial,
    generation: u64,
    policy: KeyPolicy,
    invalidated: bool,
}

/// In-memory [`KeyStore`] using AES-256-GCM through [`crate::crypto`].
///
/// Not hardware-backed: the key lives in process memory (zeroised on drop)
/// and does not survive a restart. Use it for tests and demos, or as a
/// stand-in until a platform backend is wired up.
pub struct SoftwareKeyStore {
    entries: Mutex<HashMap<String, KeyEntry>>,
    next_generation: AtomicU64,
    hardware_available: AtomicBool,
}

impl SoftwareKeyStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            hardware_available: AtomicBool::new(true),
        }
    }

    /// Simulate a biometric enrollment change: the key keeps existing but
    /// every further use fails with [`VaultError::InvalidatedKey`].
    ///
    /// Only keys generated with `invalidated_by_enrollment` are affected.
    /// Returns `false` if no such key called `name` exists.
    pub fn invalidate(&self, name: &str) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        match entries.get_mut(name) {
            Some(entry) if !entry.policy.invalidated_by_enrollment => {
                debug!(key = name, "enrollment change ignored by key policy");
                false
            }
            Some(entry) => {
                entry.invalidated = true;
                warn!(key = name, "key invalidated");
                true
            }
            None => false,
        }
    }

    /// Simulate a device with (`true`) or without (`false`) secure hardware.
    /// Without it, generating a key fails with `KeyUnavailable`.
    pub fn set_hardware_available(&self, available: bool) {
        self.hardware_available.store(available, Ordering::SeqCst);
    }

    fn lock(&self) -> VaultResult<MutexGuard<'_, HashMap<String, KeyEntry>>> {
        self.entries
            .lock()
            .map_err(|_| VaultError::KeyUnavailable("keystore lock poisoned".into()))
    }

    /// Run `f` with the raw material of a usable key.
    fn with_material<T>(
        &self,
        key: &KeyHandle,
        f: impl FnOnce(&[u8; KEY_LEN]) -> VaultResult<T>,
    ) -> VaultResult<T> {
        let entries = self.lock()?;
        let entry = usable_entry(&entries, key)?;
        f(&entry.material.bytes)
    }
}

impl Default for SoftwareKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

fn usable_entry<'a>(
    entries: &'a HashMap<String, KeyEntry>,
    key: &KeyHandle,
) -> VaultResult<&'a KeyEntry> {
    let entry = entries
        .get(key.name())
        .ok_or_else(|| VaultError::KeyUnavailable(format!("no key named {:?}", key.name())))?;
    if entry.generation != key.generation() {
        return Err(VaultError::KeyUnavailable("key was replaced".into()));
    }
    if entry.invalidated {
        return Err(VaultError::InvalidatedKey);
    }
    Ok(entry)
}

impl KeyStore for SoftwareKeyStore {
    fn ensure_key(&self, name: &str, policy: &KeyPolicy) -> VaultResult<KeyHandle> {
        let mut entries = self.lock()?;
        if let Some(entry) = entries.get(name) {
            return Ok(KeyHandle::new(name, entry.generation));
        }

        if !self.hardware_available.load(Ordering::SeqCst) {
            return Err(VaultError::KeyUnavailable("no secure hardware".into()));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let material = KeyMaterial {
            bytes: crypto::generate_random_key()?,
        };
        entries.insert(
            name.to_string(),
            KeyEntry {
                material,
                generation,
                policy: *policy,
                invalidated: false,
            },
        );
        info!(
            key = name,
            generation,
            user_auth = policy.user_authentication_required,
            "generated key"
        );
        Ok(KeyHandle::new(name, generation))
    }

    fn key_exists(&self, name: &str) -> bool {
        self.lock()
            .map(|entries| entries.contains_key(name))
            .unwrap_or(false)
    }

    fn delete_key(&self, name: &str) -> VaultResult<()> {
        if self.lock()?.remove(name).is_some() {
            debug!(key = name, "deleted key");
        }
        Ok(())
    }

    fn check_usable(&self, key: &KeyHandle) -> VaultResult<()> {
        let entries = self.lock()?;
        usable_entry(&entries, key).map(|_| ())
    }

    fn seal(&self, key: &KeyHandle, nonce: &Nonce, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
        self.with_material(key, |bytes| {
            crypto::seal(bytes, nonce, key.name().as_bytes(), plaintext)
        })
    }

    fn open(&self, key: &KeyHandle, nonce: &Nonce, ciphertext: &[u8]) -> VaultResult<Vec<u8>> {
        self.with_material(key, |bytes| {
            crypto::open(bytes, nonce, key.name().as_bytes(), ciphertext)
        })
    }
}
