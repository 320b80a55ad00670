//! Shell configuration
//!
//! Loaded from a TOML file; every field has a default so an absent or
//! partial file still yields a usable configuration.

use crate::core::block::coin_asset_id;
use crate::crypto::Hash256;
use crate::snapshot::SNAPSHOT_ENTRY;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Shell configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Directory holding the wallet and the chain snapshot
    pub data_dir: PathBuf,
    /// Wallet file name inside `data_dir`
    pub wallet_file: String,
    /// Raw snapshot file name inside `data_dir`
    pub snapshot_file: String,
    /// Entry name of the raw stream inside snapshot archives
    pub archive_entry: String,
    /// Write ZIP archives on export unless told otherwise
    pub archive_exports: bool,
    /// Turn block verification off while importing snapshots
    pub suspend_verification: bool,
    /// Asset network fees are paid in
    pub fee_asset: Hash256,
    /// Default log filter when RUST_LOG is unset
    pub log_level: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".ledger_shell"),
            wallet_file: "wallet.json".to_string(),
            snapshot_file: SNAPSHOT_ENTRY.to_string(),
            archive_entry: SNAPSHOT_ENTRY.to_string(),
            archive_exports: false,
            suspend_verification: true,
            fee_asset: coin_asset_id(),
            log_level: "info".to_string(),
        }
    }
}

impl ShellConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: ShellConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wallet_file.is_empty() {
            return Err(ConfigError::Invalid("wallet_file must not be empty".into()));
        }
        if self.snapshot_file.is_empty() {
            return Err(ConfigError::Invalid("snapshot_file must not be empty".into()));
        }
        if self.archive_entry.is_empty() {
            return Err(ConfigError::Invalid("archive_entry must not be empty".into()));
        }
        Ok(())
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join(&self.wallet_file)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file)
    }

    /// Archived snapshot path (`<snapshot_file>.zip`)
    pub fn archive_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.zip", self.snapshot_file))
    }
}
