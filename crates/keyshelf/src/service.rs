//! Credential service - orchestrates the secret store and the index
//!
//! The store is the source of truth for values. The index only answers
//! "what exists", so once a store write has succeeded a failing index update
//! is reported as a warning instead of failing the operation.

use keyshelf_core::{Config, Paths};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::{self, SecretStore};
use crate::error::{Error, Result};
use crate::index::{FileIndex, Listing, MetadataIndex, ProbeIndex, SkippedEntry, UnreadableIndex};
use crate::key::{normalize_prefix, CredentialKey};

/// Settings the service needs, passed in rather than read from globals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Prefix used by [`CredentialService::key`]
    pub default_prefix: String,
    /// Prune index entries whose secret is gone when listing
    pub verify_listing: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ServiceConfig {
    fn from(config: &Config) -> Self {
        Self {
            default_prefix: config.default_prefix.clone(),
            verify_listing: config.verify_listing,
        }
    }
}

/// One operation per invocation
#[derive(Debug, Clone)]
pub enum Request {
    Set {
        key: CredentialKey,
        value: String,
        force: bool,
    },
    Get {
        key: CredentialKey,
    },
    Delete {
        key: CredentialKey,
        force: bool,
    },
    List {
        prefix: String,
    },
    ListPrefixes,
    DeletePrefix {
        prefix: String,
    },
}

impl Request {
    pub fn operation(&self) -> &'static str {
        match self {
            Request::Set { .. } => "set",
            Request::Get { .. } => "get",
            Request::Delete { .. } => "delete",
            Request::List { .. } => "list",
            Request::ListPrefixes => "list-prefixes",
            Request::DeletePrefix { .. } => "delete-prefix",
        }
    }
}

/// Result of a dispatched [`Request`]
#[derive(Debug)]
pub enum Response {
    Stored(SetOutcome),
    Value(Option<String>),
    Deleted(DeleteOutcome),
    Credentials(Listing<(String, String)>),
    Prefixes(Listing<String>),
    Batch(BatchSummary),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOutcome {
    pub key: CredentialKey,
    /// A previous value was overwritten
    pub replaced: bool,
    /// Index update failed after the secret was stored
    pub index_warning: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    Deleted,
    /// Nothing was stored; only reachable with `force`
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub key: CredentialKey,
    pub status: DeleteStatus,
    pub index_warning: Option<String>,
}

/// Per-key outcomes of a prefix deletion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub prefix: String,
    pub deleted: Vec<String>,
    pub absent: Vec<String>,
    pub failed: Vec<FailedDelete>,
    pub skipped: Vec<SkippedEntry>,
    pub index_warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDelete {
    pub credential: String,
    pub error: String,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.deleted.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Per-invocation lifecycle, reported through tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Dispatched,
    Success,
    Failed,
}

/// Coordinates a [`SecretStore`] and a [`MetadataIndex`]
pub struct CredentialService {
    store: Arc<dyn SecretStore>,
    index: Box<dyn MetadataIndex>,
    config: ServiceConfig,
    state: State,
}

impl CredentialService {
    pub fn new(
        store: Arc<dyn SecretStore>,
        index: Box<dyn MetadataIndex>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            store,
            index,
            config,
            state: State::Idle,
        }
    }

    /// Open the store and index selected by `config`
    ///
    /// `use_filesystem` selects the index file; otherwise listings probe
    /// the store. The two are never merged. A damaged index file does not
    /// stop get/set/delete; it surfaces as index warnings and listing errors.
    pub fn open(config: &Config, paths: &Paths) -> Result<Self> {
        let store = backend::open(config, paths)?;
        let index: Box<dyn MetadataIndex> = if config.use_filesystem {
            let path = config.index_file(paths);
            match FileIndex::open(&path) {
                Ok(index) => Box::new(index),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "index unreadable, continuing without it");
                    Box::new(UnreadableIndex::new(e))
                }
            }
        } else {
            Box::new(ProbeIndex::new(store.clone()))
        };

        debug!(
            store = store.name(),
            index = index.name(),
            "credential service ready"
        );
        Ok(Self::new(store, index, ServiceConfig::from(config)))
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub fn index_name(&self) -> &str {
        self.index.name()
    }

    pub fn default_prefix(&self) -> &str {
        &self.config.default_prefix
    }

    /// Key under the default prefix
    pub fn key(&self, service: &str, variable: &str) -> Result<CredentialKey> {
        CredentialKey::new(self.config.default_prefix.as_str(), service, variable)
    }

    /// Run a single request
    pub fn dispatch(&mut self, request: Request) -> Result<Response> {
        let operation = request.operation();
        self.transition(State::Dispatched, operation);

        let result = match request {
            Request::Set { key, value, force } => self.set(&key, &value, force).map(Response::Stored),
            Request::Get { key } => self.get(&key).map(Response::Value),
            Request::Delete { key, force } => self.delete(&key, force).map(Response::Deleted),
            Request::List { prefix } => self.list(&prefix).map(Response::Credentials),
            Request::ListPrefixes => self.list_prefixes().map(Response::Prefixes),
            Request::DeletePrefix { prefix } => self.delete_prefix(&prefix).map(Response::Batch),
        };

        match &result {
            Ok(_) => self.transition(State::Success, operation),
            Err(e) => {
                debug!(operation, error = %e, "operation failed");
                self.transition(State::Failed, operation);
            }
        }
        result
    }

    /// Store a secret, refusing to overwrite an existing one unless `force`
    pub fn set(&mut self, key: &CredentialKey, value: &str, force: bool) -> Result<SetOutcome> {
        let storage_key = key.storage_key();
        let replaced = self.store.get(&storage_key)?.is_some();
        if replaced && !force {
            return Err(Error::AlreadyExists(key.to_string()));
        }

        self.store.put(&storage_key, value)?;
        debug!(credential = %key, replaced, "secret stored");

        let index_warning = match self.index.add(key) {
            Ok(_) => None,
            Err(e) => {
                warn!(credential = %key, error = %e, "secret stored but index update failed");
                Some(e.to_string())
            }
        };

        Ok(SetOutcome {
            key: key.clone(),
            replaced,
            index_warning,
        })
    }

    /// Retrieve a secret; `None` means nothing is stored
    pub fn get(&self, key: &CredentialKey) -> Result<Option<String>> {
        Ok(self.store.get(&key.storage_key())?)
    }

    pub fn exists(&self, key: &CredentialKey) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Retrieve every key that has a value, skipping absent ones
    pub fn get_many(&self, keys: &[CredentialKey]) -> Result<BTreeMap<CredentialKey, String>> {
        let mut found = BTreeMap::new();
        for key in keys {
            if let Some(value) = self.get(key)? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    /// Delete a secret
    ///
    /// A missing secret is [`Error::NotFound`] unless `force` is set, in which
    /// case any leftover index entry is still cleaned up.
    pub fn delete(&mut self, key: &CredentialKey, force: bool) -> Result<DeleteOutcome> {
        let existed = self.store.delete(&key.storage_key())?;
        if !existed && !force {
            return Err(Error::NotFound(key.to_string()));
        }

        let index_warning = match self.index.remove(key) {
            Ok(_) => None,
            Err(e) => {
                warn!(credential = %key, error = %e, "secret deleted but index update failed");
                Some(e.to_string())
            }
        };

        Ok(DeleteOutcome {
            key: key.clone(),
            status: if existed {
                DeleteStatus::Deleted
            } else {
                DeleteStatus::Absent
            },
            index_warning,
        })
    }

    /// `(service, variable)` pairs under `prefix`
    pub fn list(&mut self, prefix: &str) -> Result<Listing<(String, String)>> {
        let prefix = normalize_prefix(prefix)?;
        let mut listing = self.index.list_by_prefix(&prefix)?;

        if self.config.verify_listing && self.index.is_authoritative() {
            self.prune_stale(&prefix, &mut listing);
        }
        Ok(listing)
    }

    pub fn list_prefixes(&self) -> Result<Listing<String>> {
        self.index.list_prefixes()
    }

    /// Delete every credential under `prefix`
    ///
    /// Keys are deleted one at a time and all outcomes are collected before
    /// returning; a failing key never stops the batch.
    pub fn delete_prefix(&mut self, prefix: &str) -> Result<BatchSummary> {
        let prefix = normalize_prefix(prefix)?;
        let listing = self.index.list_by_prefix(&prefix)?;

        let mut summary = BatchSummary {
            prefix: prefix.clone(),
            skipped: listing.skipped,
            ..BatchSummary::default()
        };
        let mut forget = Vec::new();

        for (service, variable) in listing.items {
            let key = match CredentialKey::new(prefix.as_str(), service.as_str(), variable.as_str()) {
                Ok(key) => key,
                Err(e) => {
                    summary.failed.push(FailedDelete {
                        credential: format!("{}/{}", service, variable),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            match self.store.delete(&key.storage_key()) {
                Ok(true) => summary.deleted.push(key.label()),
                Ok(false) => summary.absent.push(key.label()),
                Err(e) => {
                    warn!(credential = %key, error = %e, "failed to delete");
                    summary.failed.push(FailedDelete {
                        credential: key.label(),
                        error: Error::from(e).to_string(),
                    });
                    continue;
                }
            }
            forget.push(key);
        }

        if let Err(e) = self.index.remove_all(&forget) {
            warn!(prefix = %prefix, error = %e, "credentials deleted but index update failed");
            summary.index_warning = Some(e.to_string());
        }

        debug!(
            prefix = %prefix,
            deleted = summary.deleted.len(),
            absent = summary.absent.len(),
            failed = summary.failed.len(),
            "prefix deletion finished"
        );
        Ok(summary)
    }

    fn prune_stale(&mut self, prefix: &str, listing: &mut Listing<(String, String)>) {
        let mut stale = Vec::new();

        for (service, variable) in &listing.items {
            let Ok(key) = CredentialKey::new(prefix, service.as_str(), variable.as_str()) else {
                continue;
            };
            match self.store.get(&key.storage_key()) {
                Ok(Some(_)) => {}
                Ok(None) => stale.push(key),
                Err(e) => warn!(credential = %key, error = %e, "could not verify entry"),
            }
        }

        if stale.is_empty() {
            return;
        }

        for key in &stale {
            listing
                .items
                .remove(&(key.service().to_string(), key.variable().to_string()));
        }
        match self.index.remove_all(&stale) {
            Ok(n) => debug!(prefix, removed = n, "pruned stale index entries"),
            Err(e) => warn!(prefix, error = %e, "could not prune stale index entries"),
        }
    }

    fn transition(&mut self, next: State, operation: &str) {
        debug!(operation, from = ?self.state, to = ?next, "state change");
        self.state = next;
    }
}
