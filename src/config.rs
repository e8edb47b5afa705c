//! Vault configuration.
//!
//! | Variable               | Field      | Default                  |
//! |------------------------|------------|--------------------------|
//! | `SEALGATE_KEY_NAME`    | `key_name` | `sealgate-biometric-key` |
//! | `SEALGATE_SLOT`        | `slot`     | `credential`             |
//! | `SEALGATE_DATA_DIR`    | `data_dir` | `./sealgate-data`        |
//! | `SEALGATE_LOG_FORMAT`  | (logging)  | `pretty`                 |
//! | `RUST_LOG`             | (logging)  | `sealgate=info`          |

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::gate::PromptInfo;

/// Environment variable overriding the logical key name.
pub const KEY_NAME_ENV: &str = "SEALGATE_KEY_NAME";

/// Environment variable overriding the record slot.
pub const SLOT_ENV: &str = "SEALGATE_SLOT";

/// Environment variable overriding the durable store directory.
pub const DATA_DIR_ENV: &str = "SEALGATE_DATA_DIR";

pub const DEFAULT_KEY_NAME: &str = "sealgate-biometric-key";
pub const DEFAULT_SLOT: &str = "credential";
pub const DEFAULT_DATA_DIR: &str = "./sealgate-data";

/// Everything the controller needs besides its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Logical name of the keystore key.
    pub key_name: String,
    /// Slot the sealed record is stored under.
    pub slot: String,
    /// Directory for the durable ciphertext store.
    pub data_dir: PathBuf,
    pub prompt: PromptInfo,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            key_name: DEFAULT_KEY_NAME.to_string(),
            slot: DEFAULT_SLOT.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            prompt: PromptInfo::default(),
        }
    }
}

impl VaultConfig {
    /// Defaults overlaid with any `SEALGATE_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(name) = env::var(KEY_NAME_ENV) {
            config.key_name = name;
        }
        if let Ok(slot) = env::var(SLOT_ENV) {
            config.slot = slot;
        }
        if let Ok(dir) = env::var(DATA_DIR_ENV) {
            config.data_dir = PathBuf::from(dir);
        }
        config
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
