//! Index rebuilt from the secret store's own enumeration

use std::sync::Arc;

use super::{by_prefix, decode_all, prefixes, Listing, MetadataIndex};
use crate::backend::SecretStore;
use crate::error::{Error, Result};
use crate::key::CredentialKey;

/// Index that asks the store what it holds on every listing
///
/// Only entries the store can enumerate are seen, so the picture may be
/// incomplete. Stores without a listing capability yield
/// [`Error::EnumerationUnsupported`] rather than an empty result.
pub struct ProbeIndex {
    store: Arc<dyn SecretStore>,
}

impl ProbeIndex {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    fn probe(&self) -> Result<(Vec<CredentialKey>, Vec<super::SkippedEntry>)> {
        let enumerator = self.store.enumerator().ok_or_else(|| {
            Error::EnumerationUnsupported(format!(
                "the {} store cannot list its entries; enable the filesystem index",
                self.store.name()
            ))
        })?;
        let raw = enumerator.enumerate()?;
        Ok(decode_all(raw))
    }
}

impl MetadataIndex for ProbeIndex {
    fn name(&self) -> &str {
        "probe"
    }

    fn is_authoritative(&self) -> bool {
        false
    }

    fn add(&mut self, _key: &CredentialKey) -> Result<bool> {
        Ok(false)
    }

    fn remove(&mut self, _key: &CredentialKey) -> Result<bool> {
        Ok(false)
    }

    fn list_by_prefix(&self, prefix: &str) -> Result<Listing<(String, String)>> {
        let (keys, skipped) = self.probe()?;
        Ok(by_prefix(keys, skipped, prefix))
    }

    fn list_prefixes(&self) -> Result<Listing<String>> {
        let (keys, skipped) = self.probe()?;
        Ok(prefixes(keys, skipped))
    }
}
