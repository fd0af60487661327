//! Secret store backends
//!
//! Every backend speaks the same small capability set: put, get and delete
//! by [`StorageKey`]. Listing is an optional capability exposed through
//! [`SecretStore::enumerator`] so callers can tell "nothing stored" apart
//! from "this store cannot list".
//!
//! Built-in implementations:
//! - [`KeychainStore`]: the OS keychain (no listing)
//! - [`VaultStore`]: age-encrypted files on disk (lists its directory)
//! - [`MemoryStore`]: in-process map for tests

mod keychain;
mod memory;
mod vault;

pub use keychain::KeychainStore;
pub use memory::MemoryStore;
pub use vault::VaultStore;

use keyshelf_core::{BackendKind, Config, Paths};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::key::StorageKey;

/// Errors reported by a backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store not available: {0}")]
    Unavailable(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Uniform interface over a secret store
///
/// Writes must be atomic per key: after `put` or `delete` returns an error
/// the previous value is still the stored one.
pub trait SecretStore: Send + Sync {
    /// Human-readable name of this store
    fn name(&self) -> &str;

    /// Check whether the store can be used on this host
    fn is_available(&self) -> bool {
        true
    }

    /// Store or replace a secret
    fn put(&self, key: &StorageKey, value: &str) -> StoreResult<()>;

    /// Retrieve a secret, `None` when absent
    fn get(&self, key: &StorageKey) -> StoreResult<Option<String>>;

    /// Delete a secret, returning whether it existed
    fn delete(&self, key: &StorageKey) -> StoreResult<bool>;

    /// Listing capability, `None` when the store cannot enumerate
    fn enumerator(&self) -> Option<&dyn Enumerate> {
        None
    }
}

/// Optional listing capability of a [`SecretStore`]
pub trait Enumerate {
    /// Raw storage keys currently held by the store
    ///
    /// Keys are returned undecoded; the store may hold entries this tool
    /// did not write.
    fn enumerate(&self) -> StoreResult<Vec<String>>;
}

/// Keychain service name all entries are filed under
pub const KEYCHAIN_SERVICE: &str = "keyshelf";

/// Open the secret store selected by `config`
///
/// `auto` probes the native keychain and falls back to the vault when the
/// keychain cannot be reached.
pub fn open(config: &Config, paths: &Paths) -> Result<Arc<dyn SecretStore>> {
    match config.backend {
        BackendKind::Keychain => {
            let store = KeychainStore::with_service(KEYCHAIN_SERVICE);
            if !store.is_available() {
                return Err(Error::BackendUnavailable(
                    "the native keychain is not reachable on this host".to_string(),
                ));
            }
            Ok(Arc::new(store))
        }
        BackendKind::Vault => open_vault(paths),
        BackendKind::Auto => {
            let store = KeychainStore::with_service(KEYCHAIN_SERVICE);
            if store.is_available() {
                debug!(backend = store.name(), "selected secret store");
                return Ok(Arc::new(store));
            }
            info!("native keychain unavailable, falling back to the encrypted vault");
            open_vault(paths)
        }
    }
}

fn open_vault(paths: &Paths) -> Result<Arc<dyn SecretStore>> {
    let root = paths.vault_root();
    let store = VaultStore::open(&root).map_err(|e| {
        Error::BackendUnavailable(format!("vault at {} unusable: {}", root.display(), e))
    })?;
    debug!(backend = store.name(), root = %root.display(), "selected secret store");
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_vault_backend() {
        let temp = TempDir::new().unwrap();
        let paths = Paths::with_roots(&temp.path().join("data"), &temp.path().join("config"));
        let config = Config {
            backend: BackendKind::Vault,
            ..Config::default()
        };

        let store = open(&config, &paths).unwrap();
        assert_eq!(store.name(), "vault");
        assert!(store.enumerator().is_some());
    }

    #[test]
    fn test_open_vault_unusable_root() {
        let temp = TempDir::new().unwrap();
        // A regular file where the data directory should be
        let blocker = temp.path().join("data");
        std::fs::write(&blocker, "not a dir").unwrap();
        let paths = Paths::with_roots(&blocker, &temp.path().join("config"));
        let config = Config {
            backend: BackendKind::Vault,
            ..Config::default()
        };

        assert!(matches!(
            open(&config, &paths),
            Err(Error::BackendUnavailable(_))
        ));
    }
}
