use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::runtime::kv::{Kv, BLOCK_CACHE_BYTES};

fn default_db_path() -> String {
    "./db".to_string()
}

fn default_namespace() -> String {
    "balances:".to_string()
}

fn default_block_cache_bytes() -> usize {
    BLOCK_CACHE_BYTES
}

/// Store configuration, loadable from a JSON file. Every field has a
/// sensible default so an empty object is a valid config.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Key namespace for this store inside a shared physical DB.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_block_cache_bytes")]
    pub block_cache_bytes: usize,

    /// Genesis allocations to seed on first start, if any.
    #[serde(default)]
    pub bootstrap_balances_file: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            namespace: default_namespace(),
            block_cache_bytes: default_block_cache_bytes(),
            bootstrap_balances_file: None,
        }
    }
}

impl StoreConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read(path.as_ref())
            .with_context(|| format!("failed to read config {}", path.as_ref().display()))?;
        serde_json::from_slice(&raw)
            .with_context(|| format!("invalid config {}", path.as_ref().display()))
    }

    /// Open the store this config describes.
    pub fn open_store(&self) -> Result<Arc<Kv>> {
        Ok(Arc::new(Kv::open_with_cache(
            &self.db_path,
            self.namespace.as_bytes(),
            self.block_cache_bytes,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg: StoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.db_path, "./db");
        assert_eq!(cfg.namespace, "balances:");
        assert!(cfg.bootstrap_balances_file.is_none());
    }

    #[test]
    fn test_from_file_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"db_path": "/var/lib/tally", "bootstrap_balances_file": "genesis.json"}}"#
        )
        .unwrap();

        let cfg = StoreConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.db_path, "/var/lib/tally");
        assert_eq!(cfg.bootstrap_balances_file.as_deref(), Some("genesis.json"));
        assert_eq!(cfg.namespace, "balances:");
    }
}
