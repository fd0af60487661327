//! Vault - encrypted file fallback store
//!
//! Each secret is a separate age-encrypted file in the vault directory. The
//! file name is the hex form of the storage key, so any valid key is a safe
//! file name and the directory listing decodes back to storage keys.
//!
//! Keys whose hex form would not fit in a file name are stored under the
//! SHA-256 of the key instead, with the storage key kept in a `.key` file
//! beside the secret so listings still see it.
//!
//! Layout under the vault root:
//! - `keys/identity.key`: X25519 identity, generated on first use (0600)
//! - `secrets/<hex>.age`: one encrypted secret per key (0600)
//! - `secrets/sha256-<digest>.age` + `.key`: same, for long keys

use age::secrecy::ExposeSecret;
use keyshelf_core::fs::write_atomic;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{Enumerate, SecretStore, StoreError, StoreResult};
use crate::key::StorageKey;

const SECRET_EXTENSION: &str = "age";
const NAME_EXTENSION: &str = "key";
const DIGEST_PREFIX: &str = "sha256-";

/// Longest hex stem used as-is; leaves room for the extension and the
/// temp-file decoration under the usual 255-byte name limit
const MAX_HEX_STEM: usize = 200;

/// Secret store keeping age-encrypted files on local disk
pub struct VaultStore {
    /// Directory for encrypted secrets
    secrets_dir: PathBuf,
    /// Path to the identity key file
    identity_path: PathBuf,
    identity: age::x25519::Identity,
}

impl VaultStore {
    /// Open the vault at `root`, creating directories and identity as needed
    pub fn open(root: &Path) -> StoreResult<Self> {
        let secrets_dir = root.join("secrets");
        let keys_dir = root.join("keys");
        let identity_path = keys_dir.join("identity.key");

        fs::create_dir_all(&secrets_dir)?;
        fs::create_dir_all(&keys_dir)?;
        restrict_dir(root)?;
        restrict_dir(&secrets_dir)?;
        restrict_dir(&keys_dir)?;

        let identity = if identity_path.exists() {
            load_identity(&identity_path)?
        } else {
            debug!(path = %identity_path.display(), "generating vault identity");
            let identity = age::x25519::Identity::generate();
            write_atomic(
                &identity_path,
                identity.to_string().expose_secret().as_bytes(),
            )?;
            identity
        };

        Ok(Self {
            secrets_dir,
            identity_path,
            identity,
        })
    }

    /// Public key (recipient) of the vault identity
    pub fn public_key(&self) -> String {
        self.identity.to_public().to_string()
    }

    pub fn identity_path(&self) -> &Path {
        &self.identity_path
    }

    /// Get the path for a secret file
    fn secret_path(&self, key: &StorageKey) -> PathBuf {
        self.secrets_dir
            .join(format!("{}.{}", file_stem(key), SECRET_EXTENSION))
    }

    /// Sidecar holding the storage key of a digest-named secret
    fn name_path(&self, key: &StorageKey) -> Option<PathBuf> {
        let stem = file_stem(key);
        stem.starts_with(DIGEST_PREFIX)
            .then(|| self.secrets_dir.join(format!("{}.{}", stem, NAME_EXTENSION)))
    }

    fn encrypt(&self, value: &str) -> StoreResult<Vec<u8>> {
        let recipient = self.identity.to_public();
        let encryptor = age::Encryptor::with_recipients(vec![Box::new(recipient)])
            .ok_or_else(|| StoreError::Backend("no recipients for encryption".to_string()))?;

        let mut encrypted = vec![];
        let mut writer = encryptor
            .wrap_output(&mut encrypted)
            .map_err(|e| StoreError::Backend(format!("encryption failed: {}", e)))?;

        writer
            .write_all(value.as_bytes())
            .map_err(|e| StoreError::Backend(format!("encryption failed: {}", e)))?;

        writer
            .finish()
            .map_err(|e| StoreError::Backend(format!("encryption failed: {}", e)))?;

        Ok(encrypted)
    }

    fn decrypt(&self, encrypted: &[u8]) -> StoreResult<String> {
        let decryptor = match age::Decryptor::new(encrypted)
            .map_err(|e| StoreError::Backend(format!("decryption failed: {}", e)))?
        {
            age::Decryptor::Recipients(d) => d,
            _ => {
                return Err(StoreError::Backend(
                    "unexpected passphrase encryption".to_string(),
                ))
            }
        };

        let mut decrypted = vec![];
        let mut reader = decryptor
            .decrypt(std::iter::once(&self.identity as &dyn age::Identity))
            .map_err(|e| StoreError::Backend(format!("decryption failed: {}", e)))?;

        reader
            .read_to_end(&mut decrypted)
            .map_err(|e| StoreError::Backend(format!("decryption failed: {}", e)))?;

        String::from_utf8(decrypted)
            .map_err(|_| StoreError::Backend("secret is not valid UTF-8".to_string()))
    }
}

impl SecretStore for VaultStore {
    fn name(&self) -> &str {
        "vault"
    }

    fn put(&self, key: &StorageKey, value: &str) -> StoreResult<()> {
        let encrypted = self.encrypt(value)?;
        // Name first, so a listed secret always has a readable key
        if let Some(name_path) = self.name_path(key) {
            write_atomic(&name_path, key.as_str().as_bytes())?;
        }
        write_atomic(&self.secret_path(key), &encrypted)?;
        Ok(())
    }

    fn get(&self, key: &StorageKey) -> StoreResult<Option<String>> {
        let path = self.secret_path(key);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut encrypted = vec![];
        file.read_to_end(&mut encrypted)?;
        self.decrypt(&encrypted).map(Some)
    }

    fn delete(&self, key: &StorageKey) -> StoreResult<bool> {
        let existed = remove_if_present(&self.secret_path(key))?;
        if let Some(name_path) = self.name_path(key) {
            remove_if_present(&name_path)?;
        }
        Ok(existed)
    }

    fn enumerator(&self) -> Option<&dyn Enumerate> {
        Some(self)
    }
}

impl Enumerate for VaultStore {
    fn enumerate(&self) -> StoreResult<Vec<String>> {
        let mut keys = vec![];

        for entry in fs::read_dir(&self.secrets_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e != SECRET_EXTENSION).unwrap_or(true) {
                continue;
            }

            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            // Undecodable names are passed through so the index reports them
            let key = if stem.starts_with(DIGEST_PREFIX) {
                match fs::read_to_string(path.with_extension(NAME_EXTENSION)) {
                    Ok(name) => name,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => stem.to_string(),
                    Err(e) => return Err(e.into()),
                }
            } else {
                hex_decode(stem).unwrap_or_else(|| stem.to_string())
            };
            keys.push(key);
        }

        keys.sort();
        Ok(keys)
    }
}

fn load_identity(path: &Path) -> StoreResult<age::x25519::Identity> {
    let content = fs::read_to_string(path)?;
    content
        .trim()
        .parse::<age::x25519::Identity>()
        .map_err(|e| StoreError::Backend(format!("failed to parse identity: {}", e)))
}

#[cfg(unix)]
fn restrict_dir(path: &Path) -> StoreResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_dir(_path: &Path) -> StoreResult<()> {
    Ok(())
}

fn remove_if_present(path: &Path) -> StoreResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// File name (without extension) for a storage key
fn file_stem(key: &StorageKey) -> String {
    let encoded = hex::encode(key.as_str());
    if encoded.len() <= MAX_HEX_STEM {
        return encoded;
    }
    let mut hasher = Sha256::new();
    hasher.update(key.as_str().as_bytes());
    format!("{}{}", DIGEST_PREFIX, hex::encode(hasher.finalize()))
}

fn hex_decode(s: &str) -> Option<String> {
    let bytes = hex::decode(s).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::CredentialKey;
    use tempfile::TempDir;

    fn skey(p: &str, s: &str, v: &str) -> StorageKey {
        CredentialKey::new(p, s, v).unwrap().storage_key()
    }

    #[test]
    fn test_open_creates_identity() {
        let temp = TempDir::new().unwrap();
        let vault = VaultStore::open(temp.path()).unwrap();
        assert!(vault.identity_path().exists());
        assert!(vault.public_key().starts_with("age1"));

        // Reopening keeps the same identity
        let again = VaultStore::open(temp.path()).unwrap();
        assert_eq!(vault.public_key(), again.public_key());
    }

    #[test]
    fn test_set_get() {
        let temp = TempDir::new().unwrap();
        let vault = VaultStore::open(temp.path()).unwrap();
        let key = skey("dev", "github", "token");

        vault.put(&key, "sk-test123").unwrap();
        assert_eq!(vault.get(&key).unwrap().as_deref(), Some("sk-test123"));

        vault.put(&key, "rotated").unwrap();
        assert_eq!(vault.get(&key).unwrap().as_deref(), Some("rotated"));
    }

    #[test]
    fn test_value_is_encrypted_at_rest() {
        let temp = TempDir::new().unwrap();
        let vault = VaultStore::open(temp.path()).unwrap();
        let key = skey("dev", "db", "password");
        vault.put(&key, "hunter2-plaintext").unwrap();

        let raw = fs::read(vault.secret_path(&key)).unwrap();
        let needle = b"hunter2-plaintext";
        assert!(!raw.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn test_not_found_and_delete() {
        let temp = TempDir::new().unwrap();
        let vault = VaultStore::open(temp.path()).unwrap();
        let key = skey("dev", "nothing", "here");

        assert_eq!(vault.get(&key).unwrap(), None);
        assert!(!vault.delete(&key).unwrap());

        vault.put(&key, "v").unwrap();
        assert!(vault.delete(&key).unwrap());
        assert_eq!(vault.get(&key).unwrap(), None);
    }

    #[test]
    fn test_enumerate_decodes_file_names() {
        let temp = TempDir::new().unwrap();
        let vault = VaultStore::open(temp.path()).unwrap();
        vault.put(&skey("dev", "a:b", "x"), "1").unwrap();
        vault.put(&skey("prod", "c", "y"), "2").unwrap();
        fs::write(temp.path().join("secrets/not-hex.age"), b"junk").unwrap();
        fs::write(temp.path().join("secrets/ignored.txt"), b"junk").unwrap();

        let keys = vault.enumerator().unwrap().enumerate().unwrap();
        assert_eq!(
            keys,
            vec![
                "dev:a%3Ab:x".to_string(),
                "not-hex".to_string(),
                "prod:c:y".to_string()
            ]
        );
    }

    #[test]
    fn test_file_names() {
        assert_eq!(file_stem(&skey("a", "b", "c")), "613a623a63");
        assert_eq!(hex_decode("613a62").as_deref(), Some("a:b"));
        assert_eq!(hex_decode("abc"), None);
        assert_eq!(hex_decode("zz"), None);

        let long = file_stem(&skey("mcp", "github", &"A".repeat(120)));
        assert!(long.starts_with(DIGEST_PREFIX));
        assert_eq!(long.len(), DIGEST_PREFIX.len() + 64);
    }

    #[test]
    fn test_long_key_round_trip() {
        let temp = TempDir::new().unwrap();
        let vault = VaultStore::open(temp.path()).unwrap();
        let long = skey("mcp", "github", &"A".repeat(120));
        let short = skey("mcp", "github", "token");

        vault.put(&long, "abc123").unwrap();
        vault.put(&short, "def456").unwrap();
        assert_eq!(vault.get(&long).unwrap().as_deref(), Some("abc123"));

        let keys = vault.enumerator().unwrap().enumerate().unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&long.as_str().to_string()));
        assert!(keys.contains(&short.as_str().to_string()));

        assert!(vault.delete(&long).unwrap());
        assert_eq!(vault.get(&long).unwrap(), None);
        // Sidecar goes with the secret
        let leftovers: Vec<_> = fs::read_dir(temp.path().join("secrets"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().map(|e| e == NAME_EXTENSION).unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }
}
