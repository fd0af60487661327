//! keyshelf - local credential storage over the OS keychain
//!
//! Secrets are addressed by `(prefix, service, variable)` and stored in the
//! platform secret store, with an age-encrypted vault as the fallback when no
//! keychain is reachable. Keychains cannot list what they hold, so a metadata
//! index tracks which prefixes and credentials exist.
//!
//! ```rust,ignore
//! use keyshelf::{CredentialService, Request, Response};
//! use keyshelf_core::{Config, Paths};
//!
//! let config = Config::load(&Paths::new())?;
//! let mut service = CredentialService::open(&config, &Paths::new())?;
//!
//! let key = service.key("github", "token")?;
//! service.dispatch(Request::Set { key: key.clone(), value: "abc123".into(), force: false })?;
//! ```

pub mod backend;
pub mod error;
pub mod index;
pub mod key;
pub mod service;

pub use backend::{Enumerate, KeychainStore, MemoryStore, SecretStore, StoreError, VaultStore};
pub use error::{Error, Result};
pub use index::{
    FileIndex, IndexEntry, Listing, MetadataIndex, ProbeIndex, SkippedEntry, UnreadableIndex,
};
pub use key::{CredentialKey, KeyCodec, StorageKey};
pub use service::{
    BatchSummary, CredentialService, DeleteOutcome, DeleteStatus, Request, Response,
    ServiceConfig, SetOutcome,
};
