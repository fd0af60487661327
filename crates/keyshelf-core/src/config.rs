//! Configuration management for keyshelf
//!
//! Configuration file: ~/.config/keyshelf/config.yaml
//!
//! ```yaml
//! default_prefix: mcp
//! use_filesystem: true
//! backend: auto        # auto | keychain | vault
//! index_path: /custom/index.json
//! verify_listing: false
//! ```
//!
//! Every field is optional. Command-line flags override the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::Paths;

/// Which secret store to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Native keychain if usable, otherwise the encrypted vault
    #[default]
    Auto,
    /// Native keychain only
    Keychain,
    /// Encrypted vault only
    Vault,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Auto => "auto",
            BackendKind::Keychain => "keychain",
            BackendKind::Vault => "vault",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(BackendKind::Auto),
            "keychain" | "native" => Ok(BackendKind::Keychain),
            "vault" | "file" => Ok(BackendKind::Vault),
            other => Err(format!(
                "unknown backend '{}' (expected auto, keychain or vault)",
                other
            )),
        }
    }
}

/// keyshelf configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Prefix used when none is given on the command line
    #[serde(default = "default_prefix")]
    pub default_prefix: String,

    /// Track credentials in a local index file instead of probing the store
    #[serde(default)]
    pub use_filesystem: bool,

    /// Secret store selection
    #[serde(default)]
    pub backend: BackendKind,

    /// Override for the index file location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_path: Option<PathBuf>,

    /// Drop index entries whose secret has disappeared when listing
    #[serde(default)]
    pub verify_listing: bool,
}

fn default_prefix() -> String {
    "mcp".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_prefix: default_prefix(),
            use_filesystem: false,
            backend: BackendKind::default(),
            index_path: None,
            verify_listing: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load(paths: &Paths) -> Result<Self> {
        Self::load_from(&paths.config_file())
    }

    /// Load configuration from a specific path, falling back to defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Self = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config dir {:?}", parent))?;
        }
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;
        Ok(())
    }

    /// Index file location, honouring the override
    pub fn index_file(&self, paths: &Paths) -> PathBuf {
        self.index_path
            .clone()
            .unwrap_or_else(|| paths.index_file())
    }
}
