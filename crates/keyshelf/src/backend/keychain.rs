//! System keychain secret store
//!
//! Uses the OS keychain for secure secret storage:
//! - macOS: Keychain
//! - Windows: Credential Manager
//! - Linux: Secret Service (GNOME Keyring, KWallet)
//!
//! Every entry is filed under one keychain service name with the encoded
//! storage key as the account, e.g. service `keyshelf`, account
//! `dev:github:token`. Keychains offer no listing API, so this store has no
//! enumeration capability.

use keyring::Entry;
use tracing::{debug, warn};

use super::{SecretStore, StoreError, StoreResult};
use crate::key::StorageKey;

/// Whether keyring was built with a persistent platform store. Elsewhere it
/// only has an in-process mock that forgets everything on exit.
const PLATFORM_STORE: bool = cfg!(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "windows"
));

/// Account name used to probe whether the keychain answers at all
const PROBE_ACCOUNT: &str = "__keyshelf_availability_probe__";

/// Secret store backed by the system keychain
pub struct KeychainStore {
    service_name: String,
}

impl KeychainStore {
    /// Create a keychain store filing entries under `service`
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service_name: service.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    fn entry(&self, account: &str) -> StoreResult<Entry> {
        Entry::new(&self.service_name, account).map_err(map_error)
    }
}

impl SecretStore for KeychainStore {
    fn name(&self) -> &str {
        "keychain"
    }

    fn is_available(&self) -> bool {
        if !PLATFORM_STORE {
            debug!("no persistent keychain backend on this platform");
            return false;
        }

        // Creating an Entry succeeds even without a keychain daemon; only a
        // real lookup tells us whether the platform store answers.
        let entry = match Entry::new(&self.service_name, PROBE_ACCOUNT) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "keychain entry creation failed");
                return false;
            }
        };

        match entry.get_password() {
            Ok(_) | Err(keyring::Error::NoEntry) => true,
            Err(e) => {
                debug!(error = %e, "keychain probe failed");
                false
            }
        }
    }

    fn put(&self, key: &StorageKey, value: &str) -> StoreResult<()> {
        debug!(service = %self.service_name, "keychain put");
        self.entry(key.as_str())?.set_password(value).map_err(map_error)
    }

    fn get(&self, key: &StorageKey) -> StoreResult<Option<String>> {
        match self.entry(key.as_str())?.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(map_error(e)),
        }
    }

    fn delete(&self, key: &StorageKey) -> StoreResult<bool> {
        match self.entry(key.as_str())?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(map_error(e)),
        }
    }
}

fn map_error(err: keyring::Error) -> StoreError {
    match err {
        keyring::Error::NoStorageAccess(e) => StoreError::AccessDenied(e.to_string()),
        keyring::Error::PlatformFailure(e) => StoreError::Unavailable(e.to_string()),
        other => {
            warn!(error = %other, "keychain operation failed");
            StoreError::Backend(other.to_string())
        }
    }
}
