//! Metadata index - which credentials exist
//!
//! Secret stores answer exact-key lookups but rarely list what they hold.
//! The index fills that gap with two interchangeable strategies:
//!
//! - [`ProbeIndex`] rebuilds the picture on every listing from the store's
//!   own enumeration, when the store has that capability.
//! - [`FileIndex`] keeps an explicit record on local disk that is updated on
//!   every set and delete. When that file cannot be loaded,
//!   [`UnreadableIndex`] takes its place so the store stays usable.

mod file;
mod probe;

pub use file::{FileIndex, IndexEntry, UnreadableIndex};
pub use probe::ProbeIndex;

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::warn;

use crate::error::Result;
use crate::key::{CredentialKey, KeyCodec};

/// An entry that could not be decoded while listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub raw: String,
    pub reason: String,
}

/// Result of a listing call
///
/// Corrupt entries are reported alongside the items instead of failing the
/// whole listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing<T: Ord> {
    pub items: BTreeSet<T>,
    pub skipped: Vec<SkippedEntry>,
}

impl<T: Ord> Default for Listing<T> {
    fn default() -> Self {
        Self {
            items: BTreeSet::new(),
            skipped: Vec::new(),
        }
    }
}

impl<T: Ord> Listing<T> {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Record of stored credential identities
pub trait MetadataIndex {
    /// Human-readable name of this index
    fn name(&self) -> &str;

    /// Whether the index records writes itself (as opposed to observing the store)
    fn is_authoritative(&self) -> bool;

    /// Record a key; returns whether a new entry was created
    fn add(&mut self, key: &CredentialKey) -> Result<bool>;

    /// Forget a key; returns whether an entry existed
    fn remove(&mut self, key: &CredentialKey) -> Result<bool>;

    /// Forget several keys, returning how many entries existed
    fn remove_all(&mut self, keys: &[CredentialKey]) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            if self.remove(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// `(service, variable)` pairs stored under `prefix`
    fn list_by_prefix(&self, prefix: &str) -> Result<Listing<(String, String)>>;

    /// Every prefix with at least one credential
    fn list_prefixes(&self) -> Result<Listing<String>>;
}

/// Decode raw storage keys, setting aside the ones that do not parse
pub(crate) fn decode_all<I, S>(raw_keys: I) -> (Vec<CredentialKey>, Vec<SkippedEntry>)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut keys = Vec::new();
    let mut skipped = Vec::new();

    for raw in raw_keys {
        let raw = raw.as_ref();
        match KeyCodec::decode(raw) {
            Ok(key) => keys.push(key),
            Err(e) => {
                warn!(key = raw, error = %e, "skipping undecodable entry");
                skipped.push(SkippedEntry {
                    raw: raw.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    (keys, skipped)
}

/// Entries under `prefix`; corrupt entries are kept only when their raw key
/// starts with the encoded prefix
pub(crate) fn by_prefix(
    keys: Vec<CredentialKey>,
    skipped: Vec<SkippedEntry>,
    prefix: &str,
) -> Listing<(String, String)> {
    let items = keys
        .into_iter()
        .filter(|k| k.prefix() == prefix)
        .map(|k| (k.service().to_string(), k.variable().to_string()))
        .collect();
    let marker = KeyCodec::prefix_marker(prefix);
    let skipped = skipped
        .into_iter()
        .filter(|entry| entry.raw.starts_with(&marker))
        .collect();
    Listing { items, skipped }
}

pub(crate) fn prefixes(keys: Vec<CredentialKey>, skipped: Vec<SkippedEntry>) -> Listing<String> {
    let items = keys.into_iter().map(|k| k.prefix().to_string()).collect();
    Listing { items, skipped }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_all_splits_corrupt() {
        let (keys, skipped) = decode_all(["dev:a:b", "bad", "prod:c:d"]);
        assert_eq!(keys.len(), 2);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].raw, "bad");
    }

    #[test]
    fn test_grouping() {
        let (keys, skipped) = decode_all(["dev:a:b", "dev:a:c", "prod:x:y"]);
        let listing = by_prefix(keys.clone(), skipped.clone(), "dev");
        assert_eq!(listing.len(), 2);
        assert!(listing.items.contains(&("a".to_string(), "c".to_string())));

        let all = prefixes(keys, skipped);
        assert!(listing.skipped.is_empty());
        assert_eq!(
            all.items.into_iter().collect::<Vec<_>>(),
            vec!["dev".to_string(), "prod".to_string()]
        );
    }

    #[test]
    fn test_skipped_entries_follow_their_prefix() {
        let (keys, skipped) = decode_all(["dev:a:b", "dev:only-two", "prod:x", "junk"]);
        assert_eq!(skipped.len(), 3);

        let dev = by_prefix(keys.clone(), skipped.clone(), "dev");
        assert_eq!(dev.len(), 1);
        assert_eq!(dev.skipped.len(), 1);
        assert_eq!(dev.skipped[0].raw, "dev:only-two");

        // "de" must not claim entries of "dev"
        assert!(by_prefix(keys.clone(), skipped.clone(), "de").skipped.is_empty());

        assert_eq!(prefixes(keys, skipped).skipped.len(), 3);
    }
}
