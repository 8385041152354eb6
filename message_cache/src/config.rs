//! Cache configuration: defaults, TOML loading, environment overrides, validation.
//!
//! Entrypoints:
//! - Parse + validate from a TOML string: [`load_config_str`]
//! - Parse + validate from a file path: [`load_config_path`]
//! - Apply `MESSAGE_CACHE_DIR`: [`CacheConfig::with_env_overrides`]
//!
//! Every field is optional in TOML:
//!
//! ```toml
//! cache_dir = "/var/cache/messages"
//! block_size_ns = 100000000
//! max_databases = 3
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use shared_utils::env::get_env_parsed;

use crate::error::{CacheError, CacheResult};

/// Environment variable that overrides [`CacheConfig::cache_dir`].
pub const CACHE_DIR_ENV: &str = "MESSAGE_CACHE_DIR";

/// Tuning knobs for the caching layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Directory holding the cache databases and the meta database.
    pub cache_dir: PathBuf,
    /// Size of each upstream fetch, in nanoseconds.
    pub block_size_ns: i64,
    /// How far ahead of a request's first gap a running connection may start and
    /// still be kept. Defaults to three blocks.
    pub prefetch_threshold_ns: Option<i64>,
    /// Cache databases kept on disk before the least recently used are deleted.
    pub max_databases: usize,
    /// Upper bound on read-ahead per request. `None` downloads the whole recording.
    pub cache_capacity_ns: Option<i64>,
    /// Messages larger than this are logged as suspicious.
    pub oversized_message_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("message-cache"),
            block_size_ns: 100_000_000,
            prefetch_threshold_ns: None,
            max_databases: 3,
            cache_capacity_ns: None,
            oversized_message_bytes: 10_000_000,
        }
    }
}

impl CacheConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> CacheResult<Self> {
        Self::default().with_env_overrides()
    }

    /// Replace `cache_dir` with `MESSAGE_CACHE_DIR` when it is set and non-empty.
    pub fn with_env_overrides(mut self) -> CacheResult<Self> {
        if let Some(dir) = get_env_parsed::<PathBuf>(CACHE_DIR_ENV)
            .map_err(|e| CacheError::Config(e.to_string()))?
        {
            self.cache_dir = dir;
        }
        Ok(self)
    }

    /// Effective prefetch threshold.
    pub fn prefetch_threshold(&self) -> i64 {
        self.prefetch_threshold_ns
            .unwrap_or_else(|| self.block_size_ns.saturating_mul(3))
    }

    /// Reject values the caching layers cannot work with.
    pub fn validate(&self) -> CacheResult<()> {
        if self.block_size_ns <= 0 {
            return Err(CacheError::Config(format!(
                "block_size_ns must be positive, got {}",
                self.block_size_ns
            )));
        }
        if let Some(threshold) = self.prefetch_threshold_ns
            && threshold < 0
        {
            return Err(CacheError::Config(format!(
                "prefetch_threshold_ns must not be negative, got {threshold}"
            )));
        }
        if self.max_databases == 0 {
            return Err(CacheError::Config("max_databases must be at least 1".into()));
        }
        if let Some(capacity) = self.cache_capacity_ns
            && capacity <= 0
        {
            return Err(CacheError::Config(format!(
                "cache_capacity_ns must be positive, got {capacity}"
            )));
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(CacheError::Config("cache_dir must not be empty".into()));
        }
        Ok(())
    }
}

/// Parse a TOML document and validate the result.
pub fn load_config_str(s: &str) -> CacheResult<CacheConfig> {
    let config: CacheConfig = toml::from_str(s).map_err(|e| CacheError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Read, parse and validate a TOML file.
pub fn load_config_path(path: impl AsRef<Path>) -> CacheResult<CacheConfig> {
    let path = path.as_ref();
    let s = std::fs::read_to_string(path)
        .map_err(|e| CacheError::Config(format!("failed to read {}: {e}", path.display())))?;
    load_config_str(&s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn empty_document_yields_defaults() {
        let config = load_config_str("").unwrap();
        assert_eq!(config, CacheConfig::default());
        assert_eq!(config.prefetch_threshold(), 300_000_000);
    }

    #[test]
    fn fields_override_defaults() {
        let config = load_config_str(
            r#"
            cache_dir = "/tmp/cache-test"
            block_size_ns = 50
            prefetch_threshold_ns = 10
            cache_capacity_ns = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/cache-test"));
        assert_eq!(config.block_size_ns, 50);
        assert_eq!(config.prefetch_threshold(), 10);
        assert_eq!(config.cache_capacity_ns, Some(1000));
        assert_eq!(config.max_databases, 3);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for doc in [
            "block_size_ns = 0",
            "max_databases = 0",
            "cache_capacity_ns = -5",
            "prefetch_threshold_ns = -1",
            "unknown_key = 1",
            "block_size_ns = \"fast\"",
        ] {
            assert!(
                matches!(load_config_str(doc), Err(CacheError::Config(_))),
                "{doc} should be rejected"
            );
        }
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.toml");
        std::fs::write(&path, "max_databases = 7\n").unwrap();
        assert_eq!(load_config_path(&path).unwrap().max_databases, 7);
        assert!(load_config_path(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    #[serial]
    fn env_overrides_cache_dir() {
        unsafe { std::env::set_var(CACHE_DIR_ENV, "/tmp/from-env") };
        let config = CacheConfig::from_env().unwrap();
        unsafe { std::env::remove_var(CACHE_DIR_ENV) };
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/from-env"));
    }

    #[test]
    #[serial]
    fn empty_env_value_keeps_the_default() {
        unsafe { std::env::set_var(CACHE_DIR_ENV, "") };
        let config = CacheConfig::from_env().unwrap();
        unsafe { std::env::remove_var(CACHE_DIR_ENV) };
        assert_eq!(config.cache_dir, CacheConfig::default().cache_dir);
    }
}
