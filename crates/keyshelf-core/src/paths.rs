//! Standard paths used by keyshelf

use std::path::{Path, PathBuf};

/// Standard keyshelf paths
#[derive(Debug, Clone)]
pub struct Paths {
    /// Data directory (~/.local/share/keyshelf)
    pub data: PathBuf,
    /// Config directory (~/.config/keyshelf)
    pub config: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        let data = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("keyshelf");

        let config = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("keyshelf");

        Self { data, config }
    }

    /// Paths rooted somewhere other than the user's profile (tests, sandboxes)
    pub fn with_roots(data: &Path, config: &Path) -> Self {
        Self {
            data: data.to_path_buf(),
            config: config.to_path_buf(),
        }
    }

    /// User configuration file
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.yaml")
    }

    /// Filesystem-backed metadata index
    pub fn index_file(&self) -> PathBuf {
        self.config.join("index.json")
    }

    /// Root of the encrypted fallback vault
    pub fn vault_root(&self) -> PathBuf {
        self.data.join("vault")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_roots() {
        let paths = Paths::with_roots(Path::new("/tmp/data"), Path::new("/tmp/conf"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/conf/config.yaml"));
        assert_eq!(paths.index_file(), PathBuf::from("/tmp/conf/index.json"));
        assert_eq!(paths.vault_root(), PathBuf::from("/tmp/data/vault"));
    }

    #[test]
    fn test_default_paths_are_namespaced() {
        let paths = Paths::new();
        assert!(paths.data.ends_with("keyshelf"));
        assert!(paths.config.ends_with("keyshelf"));
    }
}
