//! In-memory secret store

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{Enumerate, SecretStore, StoreError, StoreResult};
use crate::key::StorageKey;

/// In-memory secret store for tests and ephemeral use
///
/// Listing support can be switched off to stand in for stores such as the
/// native keychain that cannot enumerate.
#[derive(Debug)]
pub struct MemoryStore {
    secrets: RwLock<BTreeMap<String, String>>,
    enumerable: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store that supports listing
    pub fn new() -> Self {
        Self {
            secrets: RwLock::new(BTreeMap::new()),
            enumerable: true,
        }
    }

    /// Create an empty store without the listing capability
    pub fn without_enumeration() -> Self {
        Self {
            enumerable: false,
            ..Self::new()
        }
    }

    /// Insert a raw entry, bypassing key encoding
    pub fn insert_raw(&self, key: &str, value: &str) -> StoreResult<()> {
        self.write()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.secrets.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, BTreeMap<String, String>>> {
        self.secrets
            .write()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, BTreeMap<String, String>>> {
        self.secrets
            .read()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

impl SecretStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn put(&self, key: &StorageKey, value: &str) -> StoreResult<()> {
        self.write()?.insert(key.as_str().to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &StorageKey) -> StoreResult<Option<String>> {
        Ok(self.read()?.get(key.as_str()).cloned())
    }

    fn delete(&self, key: &StorageKey) -> StoreResult<bool> {
        Ok(self.write()?.remove(key.as_str()).is_some())
    }

    fn enumerator(&self) -> Option<&dyn Enumerate> {
        if self.enumerable {
            Some(self)
        } else {
            None
        }
    }
}

impl Enumerate for MemoryStore {
    fn enumerate(&self) -> StoreResult<Vec<String>> {
        Ok(self.read()?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::CredentialKey;

    fn skey(s: &str, v: &str) -> StorageKey {
        CredentialKey::new("dev", s, v).unwrap().storage_key()
    }

    #[test]
    fn test_put_get_delete() {
        let store = MemoryStore::new();
        let key = skey("github", "token");

        assert_eq!(store.get(&key).unwrap(), None);
        store.put(&key, "abc123").unwrap();
        assert_eq!(store.get(&key).unwrap().as_deref(), Some("abc123"));

        assert!(store.delete(&key).unwrap());
        assert!(!store.delete(&key).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_empty_value_is_a_value() {
        let store = MemoryStore::new();
        let key = skey("svc", "blank");
        store.put(&key, "").unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(String::new()));
    }

    #[test]
    fn test_enumeration_capability() {
        let store = MemoryStore::new();
        store.put(&skey("a", "1"), "x").unwrap();
        store.insert_raw("garbage", "y").unwrap();

        let keys = store.enumerator().unwrap().enumerate().unwrap();
        assert_eq!(keys, vec!["dev:a:1".to_string(), "garbage".to_string()]);

        assert!(MemoryStore::without_enumeration().enumerator().is_none());
    }
}
