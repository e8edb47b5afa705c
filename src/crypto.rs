//! Low-level cryptographic operations.
//!
//! Only this module imports `ring::aead` and `ring::rand`. Everything else
//! seals and opens exclusively through the functions exposed here, and only
//! the key store backends call them.
//!
//! Primitive choices:
//! - **Cipher**: AES-256-GCM (authenticated encryption)
//! - **Nonce**: 96-bit (12 bytes), generated fresh per seal via `SystemRandom`
//! - **Key size**: 256 bits (32 bytes)
//!
//! The nonce is *detached*: it is returned next to the ciphertext instead of
//! being prepended, because the sealed record persists the two separately.

use std::fmt;

use ring::aead::{self, Aad, LessSafeKey, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{VaultError, VaultResult};

/// The AEAD algorithm used throughout sealgate.
const ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of a key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// A 96-bit AES-GCM nonce.
///
/// A seal nonce is produced by [`generate_nonce`]; an open nonce is rebuilt
/// from a stored record with [`Nonce::from_slice`], which rejects anything
/// that is not exactly [`NONCE_LEN`] bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    /// Rebuild a nonce from stored bytes.
    pub fn from_slice(bytes: &[u8]) -> VaultResult<Self> {
        let array: [u8; NONCE_LEN] =
            bytes.try_into().map_err(|_| VaultError::MalformedNonce {
                expected: NONCE_LEN,
                found: bytes.len(),
            })?;
        Ok(Self(array))
    }

    /// The raw nonce bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Nonce(..)")
    }
}

/// Generate a cryptographically secure random nonce.
///
/// A fresh nonce is generated for every seal. There is no nonce caching or
/// counter-based generation.
pub fn generate_nonce() -> VaultResult<Nonce> {
    let rng = SystemRandom::new();
    let mut buf = [0u8; NONCE_LEN];
    rng.fill(&mut buf)
        .map_err(|_| VaultError::RandomnessFailure)?;
    Ok(Nonce(buf))
}

/// Generate a cryptographically secure random key.
pub fn generate_random_key() -> VaultResult<[u8; KEY_LEN]> {
    let rng = SystemRandom::new();
    let mut key = [0u8; KEY_LEN];
    rng.fill(&mut key)
        .map_err(|_| VaultError::RandomnessFailure)?;
    Ok(key)
}

fn bind_key(key_bytes: &[u8; KEY_LEN]) -> VaultResult<LessSafeKey> {
    let unbound = UnboundKey::new(ALGORITHM, key_bytes)
        .map_err(|_| VaultError::KeyUnavailable("key rejected by cipher".into()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt `plaintext` under `key_bytes` and `nonce`.
///
/// `aad` is authenticated but not encrypted; the same bytes must be supplied
/// to [`open`]. Returns the ciphertext with the GCM tag appended.
pub fn seal(
    key_bytes: &[u8; KEY_LEN],
    nonce: &Nonce,
    aad: &[u8],
    plaintext: &[u8],
) -> VaultResult<Vec<u8>> {
    let key = bind_key(key_bytes)?;

    let mut output = Vec::with_capacity(plaintext.len() + ALGORITHM.tag_len());
    output.extend_from_slice(plaintext);

    key.seal_in_place_append_tag(
        aead::Nonce::assume_unique_for_key(nonce.0),
        Aad::from(aad),
        &mut output,
    )
    .map_err(|_| VaultError::EncryptionFailure)?;

    Ok(output)
}

/// Decrypt `ciphertext` (with appended tag) under `key_bytes` and `nonce`.
///
/// A wrong key, wrong nonce, wrong `aad`, or tampered ciphertext fails the
/// GCM authentication check. The caller receives no partial plaintext.
pub fn open(
    key_bytes: &[u8; KEY_LEN],
    nonce: &Nonce,
    aad: &[u8],
    ciphertext: &[u8],
) -> VaultResult<Vec<u8>> {
    if ciphertext.len() < ALGORITHM.tag_len() {
        return Err(VaultError::DecryptionFailure);
    }

    let key = bind_key(key_bytes)?;
    let mut payload = ciphertext.to_vec();

    let plaintext = key
        .open_in_place(
            aead::Nonce::assume_unique_for_key(nonce.0),
            Aad::from(aad),
            &mut payload,
        )
        .map_err(|_| VaultError::DecryptionFailure)?;

    Ok(plaintext.to_vec())
}
