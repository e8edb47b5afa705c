//! Ciphertext persistence.
//!
//! A [`CiphertextStore`] keeps one [`SealedRecord`] per named slot. It is
//! opaque to plaintext: only a nonce, a ciphertext, and a timestamp are ever
//! written. [`FileStore`] is durable across restarts; [`MemoryStore`] is for
//! tests.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::Nonce;
use crate::error::{VaultError, VaultResult};

/// The persisted nonce + ciphertext pair of one sealed secret.
///
/// Only ever produced by a successful seal and only openable with the same
/// nonce under the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedRecord {
    /// Nonce the ciphertext was sealed with.
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    /// Ciphertext with the authentication tag appended.
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// When the record was sealed.
    pub sealed_at: DateTime<Utc>,
}

impl SealedRecord {
    pub(crate) fn new(nonce: Nonce, ciphertext: Vec<u8>) -> Self {
        Self {
            nonce: nonce.as_bytes().to_vec(),
            ciphertext,
            sealed_at: Utc::now(),
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Slot-addressed storage for sealed records.
pub trait CiphertextStore: Send + Sync {
    /// Store `record` at `slot`, replacing any existing record. All or
    /// nothing: on error the previous record (or absence) is untouched.
    fn put(&self, slot: &str, record: &SealedRecord) -> VaultResult<()>;

    /// Fetch the record at `slot`.
    fn get(&self, slot: &str) -> VaultResult<Option<SealedRecord>>;

    /// Remove the record at `slot`. Clearing an empty slot is a no-op.
    fn clear(&self, slot: &str) -> VaultResult<()>;

    /// Whether `slot` holds a record.
    fn contains(&self, slot: &str) -> VaultResult<bool> {
        Ok(self.get(slot)?.is_some())
    }
}

/// Slot names become file names, so keep them to a safe alphabet.
fn validate_slot(slot: &str) -> VaultResult<()> {
    let valid = !slot.is_empty()
        && slot
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(VaultError::InvalidSlot(slot.to_string()))
    }
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// Durable store writing one JSON file per slot under a directory.
///
/// Writes go to a temporary file that is flushed to disk and then renamed
/// over the target, so a crash leaves either the old record or the new one.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> VaultResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, slot: &str) -> VaultResult<PathBuf> {
        validate_slot(slot)?;
        Ok(self.dir.join(format!("{slot}.json")))
    }
}

impl CiphertextStore for FileStore {
    fn put(&self, slot: &str, record: &SealedRecord) -> VaultResult<()> {
        let path = self.record_path(slot)?;
        let temp_path = self.dir.join(format!(".{slot}.json.tmp"));
        let encoded = serde_json::to_vec(record)?;

        let written = File::create(&temp_path)
            .and_then(|mut file| {
                file.write_all(&encoded)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&temp_path, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        // Persist the rename itself. Not every platform can open a directory.
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        debug!(slot, "stored sealed record");
        Ok(())
    }

    fn get(&self, slot: &str) -> VaultResult<Option<SealedRecord>> {
        let path = self.record_path(slot)?;
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| VaultError::CorruptedRecord(e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self, slot: &str) -> VaultResult<()> {
        let path = self.record_path(slot)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(slot, "cleared sealed record");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, slot: &str) -> VaultResult<bool> {
        Ok(self.record_path(slot)?.is_file())
    }
}

// ---------------------------------------------------------------------------
// Memory store
// ---------------------------------------------------------------------------

/// In-memory store. Not durable.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, SealedRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> VaultError {
    VaultError::CorruptedRecord("store lock poisoned".into())
}

impl CiphertextStore for MemoryStore {
    fn put(&self, slot: &str, record: &SealedRecord) -> VaultResult<()> {
        validate_slot(slot)?;
        self.records
            .write()
            .map_err(|_| poisoned())?
            .insert(slot.to_string(), record.clone());
        Ok(())
    }

    fn get(&self, slot: &str) -> VaultResult<Option<SealedRecord>> {
        validate_slot(slot)?;
        Ok(self.records.read().map_err(|_| poisoned())?.get(slot).cloned())
    }

    fn clear(&self, slot: &str) -> VaultResult<()> {
        validate_slot(slot)?;
        self.records.write().map_err(|_| poisoned())?.remove(slot);
        Ok(())
    }
}
