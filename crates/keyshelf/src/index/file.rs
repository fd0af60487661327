//! Index kept as a JSON file on local disk
//!
//! ```json
//! {
//!   "version": 1,
//!   "entries": {
//!     "dev:github:token": { "created_at": "2026-01-01T00:00:00Z" }
//!   }
//! }
//! ```
//!
//! The whole file is read on open and rewritten atomically after every
//! mutation, so a crash leaves either the old or the new document on disk.

use chrono::{DateTime, Utc};
use keyshelf_core::fs::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{by_prefix, decode_all, prefixes, Listing, MetadataIndex};
use crate::error::{Error, Result};
use crate::key::{CredentialKey, KeyCodec};

const FORMAT_VERSION: u32 = 1;

/// Stored metadata for one credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct IndexRecord {
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexDocument {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, IndexRecord>,
}

/// A credential identity known to the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    pub prefix: String,
    pub service: String,
    pub variable: String,
    pub created_at: DateTime<Utc>,
}

/// Filesystem-backed metadata index
pub struct FileIndex {
    path: PathBuf,
    entries: BTreeMap<String, IndexRecord>,
}

impl FileIndex {
    /// Load the index at `path`; a missing file is an empty index
    pub fn open(path: &Path) -> Result<Self> {
        let entries = match fs::read_to_string(path) {
            Ok(content) => {
                let doc: IndexDocument = serde_json::from_str(&content).map_err(|e| {
                    Error::Index(format!("failed to parse {}: {}", path.display(), e))
                })?;
                if doc.version != FORMAT_VERSION {
                    return Err(Error::Index(format!(
                        "{} has unsupported format version {}",
                        path.display(),
                        doc.version
                    )));
                }
                doc.entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(Error::Index(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        debug!(path = %path.display(), entries = entries.len(), "loaded index");
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Metadata recorded for `key`
    pub fn entry(&self, key: &CredentialKey) -> Option<IndexEntry> {
        self.entries
            .get(key.storage_key().as_str())
            .map(|record| to_entry(key, record))
    }

    /// All decodable entries, in storage-key order
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.entries
            .iter()
            .filter_map(|(raw, record)| {
                KeyCodec::decode(raw).ok().map(|key| to_entry(&key, record))
            })
            .collect()
    }

    fn persist(&self) -> Result<()> {
        let doc = IndexDocument {
            version: FORMAT_VERSION,
            entries: self.entries.clone(),
        };
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| Error::Index(format!("failed to serialize index: {}", e)))?;
        write_atomic(&self.path, json.as_bytes()).map_err(|e| {
            Error::Index(format!("failed to write {}: {}", self.path.display(), e))
        })?;
        debug!(path = %self.path.display(), entries = self.entries.len(), "index rewritten");
        Ok(())
    }
}

impl MetadataIndex for FileIndex {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn is_authoritative(&self) -> bool {
        true
    }

    fn add(&mut self, key: &CredentialKey) -> Result<bool> {
        let raw = key.storage_key().into_string();
        if self.entries.contains_key(&raw) {
            return Ok(false);
        }

        self.entries.insert(
            raw.clone(),
            IndexRecord {
                created_at: Utc::now(),
            },
        );
        if let Err(e) = self.persist() {
            self.entries.remove(&raw);
            return Err(e);
        }
        Ok(true)
    }

    fn remove(&mut self, key: &CredentialKey) -> Result<bool> {
        Ok(self.remove_all(std::slice::from_ref(key))? == 1)
    }

    fn remove_all(&mut self, keys: &[CredentialKey]) -> Result<usize> {
        let removed: Vec<(String, IndexRecord)> = keys
            .iter()
            .filter_map(|key| {
                let raw = key.storage_key().into_string();
                self.entries.remove(&raw).map(|record| (raw, record))
            })
            .collect();

        if removed.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.persist() {
            self.entries.extend(removed);
            return Err(e);
        }
        Ok(removed.len())
    }

    fn list_by_prefix(&self, prefix: &str) -> Result<Listing<(String, String)>> {
        let (keys, skipped) = decode_all(self.entries.keys());
        Ok(by_prefix(keys, skipped, prefix))
    }

    fn list_prefixes(&self) -> Result<Listing<String>> {
        let (keys, skipped) = decode_all(self.entries.keys());
        Ok(prefixes(keys, skipped))
    }
}

/// Stand-in for an index file that failed to load
///
/// Every call reports the load failure and nothing is written, so the damaged
/// file stays on disk untouched for inspection.
#[derive(Debug, Clone)]
pub struct UnreadableIndex {
    reason: String,
}

impl UnreadableIndex {
    pub fn new(error: Error) -> Self {
        let reason = match error {
            Error::Index(reason) => reason,
            other => other.to_string(),
        };
        Self { reason }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    fn error(&self) -> Error {
        Error::Index(self.reason.clone())
    }
}

impl MetadataIndex for UnreadableIndex {
    fn name(&self) -> &str {
        "filesystem (unreadable)"
    }

    fn is_authoritative(&self) -> bool {
        false
    }

    fn add(&mut self, _key: &CredentialKey) -> Result<bool> {
        Err(self.error())
    }

    fn remove(&mut self, _key: &CredentialKey) -> Result<bool> {
        Err(self.error())
    }

    fn remove_all(&mut self, _keys: &[CredentialKey]) -> Result<usize> {
        Err(self.error())
    }

    fn list_by_prefix(&self, _prefix: &str) -> Result<Listing<(String, String)>> {
        Err(self.error())
    }

    fn list_prefixes(&self) -> Result<Listing<String>> {
        Err(self.error())
    }
}

fn to_entry(key: &CredentialKey, record: &IndexRecord) -> IndexEntry {
    IndexEntry {
        prefix: key.prefix().to_string(),
        service: key.service().to_string(),
        variable: key.variable().to_string(),
        created_at: record.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(p: &str, s: &str, v: &str) -> CredentialKey {
        CredentialKey::new(p, s, v).unwrap()
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let index = FileIndex::open(&temp.path().join("index.json")).unwrap();
        assert!(index.is_empty());
        assert!(index.list_prefixes().unwrap().is_empty());
        assert!(!temp.path().join("index.json").exists());
    }

    #[test]
    fn test_add_is_idempotent_and_persistent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("conf/index.json");
        let k = key("dev", "github", "token");

        let mut index = FileIndex::open(&path).unwrap();
        assert!(index.add(&k).unwrap());
        let created = index.entry(&k).unwrap().created_at;
        assert!(!index.add(&k).unwrap());
        assert_eq!(index.len(), 1);
        assert_eq!(index.entry(&k).unwrap().created_at, created);

        let reopened = FileIndex::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.entry(&k).unwrap().created_at, created);
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.json");
        let k = key("dev", "github", "token");

        let mut index = FileIndex::open(&path).unwrap();
        assert!(!index.remove(&k).unwrap());
        index.add(&k).unwrap();
        assert!(index.remove(&k).unwrap());
        assert!(index.list_by_prefix("dev").unwrap().is_empty());

        assert!(FileIndex::open(&path).unwrap().is_empty());
    }

    #[test]
    fn test_remove_all() {
        let temp = TempDir::new().unwrap();
        let mut index = FileIndex::open(&temp.path().join("index.json")).unwrap();
        let a = key("dev", "a", "1");
        let b = key("dev", "b", "2");
        let c = key("prod", "c", "3");
        for k in [&a, &b, &c] {
            index.add(k).unwrap();
        }

        let missing = key("dev", "zzz", "9");
        assert_eq!(index.remove_all(&[a, b, missing]).unwrap(), 2);
        assert_eq!(index.list_prefixes().unwrap().items.len(), 1);
    }

    #[test]
    fn test_listing() {
        let temp = TempDir::new().unwrap();
        let mut index = FileIndex::open(&temp.path().join("index.json")).unwrap();
        index.add(&key("dev", "github", "token")).unwrap();
        index.add(&key("dev", "openai", "key")).unwrap();
        index.add(&key("prod", "github", "token")).unwrap();

        let dev = index.list_by_prefix("dev").unwrap();
        assert_eq!(
            dev.items.into_iter().collect::<Vec<_>>(),
            vec![
                ("github".to_string(), "token".to_string()),
                ("openai".to_string(), "key".to_string()),
            ]
        );

        let prefixes = index.list_prefixes().unwrap();
        assert_eq!(
            prefixes.items.into_iter().collect::<Vec<_>>(),
            vec!["dev".to_string(), "prod".to_string()]
        );
    }

    #[test]
    fn test_corrupt_entry_skipped() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.json");
        fs::write(
            &path,
            r#"{"version":1,"entries":{
                "dev:github:token":{"created_at":"2026-01-01T00:00:00Z"},
                "dev:broken":{"created_at":"2026-01-01T00:00:00Z"},
                "broken":{"created_at":"2026-01-01T00:00:00Z"}
            }}"#,
        )
        .unwrap();

        let index = FileIndex::open(&path).unwrap();
        let listing = index.list_by_prefix("dev").unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing.skipped.len(), 1);
        assert_eq!(listing.skipped[0].raw, "dev:broken");
        assert_eq!(index.list_prefixes().unwrap().skipped.len(), 2);
        assert_eq!(index.entries().len(), 1);
    }

    #[test]
    fn test_rejects_garbage_and_unknown_version() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.json");

        fs::write(&path, "not json").unwrap();
        assert!(matches!(FileIndex::open(&path), Err(Error::Index(_))));

        fs::write(&path, r#"{"version":99,"entries":{}}"#).unwrap();
        assert!(matches!(FileIndex::open(&path), Err(Error::Index(_))));
    }

    #[test]
    fn test_unreadable_index_reports_load_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.json");
        fs::write(&path, "{ truncated").unwrap();

        let err = FileIndex::open(&path).err().unwrap();
        let mut index = UnreadableIndex::new(err);
        assert!(index.reason().starts_with("failed to parse"));
        assert!(!index.is_authoritative());

        let k = key("dev", "a", "b");
        assert!(matches!(index.add(&k), Err(Error::Index(ref r)) if r.starts_with("failed to parse")));
        assert!(matches!(index.remove(&k), Err(Error::Index(_))));
        assert!(matches!(index.list_by_prefix("dev"), Err(Error::Index(_))));
        assert!(matches!(index.list_prefixes(), Err(Error::Index(_))));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ truncated");
    }

    #[test]
    fn test_failed_write_keeps_memory_consistent() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("conf");
        let mut index = FileIndex::open(&dir.join("index.json")).unwrap();
        // Parent of the index path becomes a regular file, so every write fails
        fs::write(&dir, "x").unwrap();

        let k = key("dev", "a", "b");
        assert!(index.add(&k).is_err());
        assert!(index.is_empty());
    }
}
