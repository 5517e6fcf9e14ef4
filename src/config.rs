use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::btree::{DEFAULT_INTERNAL_ORDER, DEFAULT_LEAF_ORDER, TreeOptions};
use crate::buffer::EvictionPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Engine settings, loadable from JSON. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of page frames in the buffer pool
    pub pool_capacity: usize,
    pub leaf_order: usize,
    pub internal_order: usize,
    pub delayed_merge: bool,
    pub eviction: EvictionPolicy,
    /// Most tables that may be open at once
    pub max_tables: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 256,
            leaf_order: DEFAULT_LEAF_ORDER,
            internal_order: DEFAULT_INTERNAL_ORDER,
            delayed_merge: false,
            eviction: EvictionPolicy::Lru,
            max_tables: 16,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.pool_capacity == 0 {
            return Err(ConfigError::Invalid(
                "pool_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_tables == 0 {
            return Err(ConfigError::Invalid(
                "max_tables must be at least 1".to_string(),
            ));
        }
        self.tree_options()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn tree_options(&self) -> TreeOptions {
        TreeOptions {
            leaf_order: self.leaf_order,
            internal_order: self.internal_order,
            delayed_merge: self.delayed_merge,
        }
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_orders(mut self, leaf_order: usize, internal_order: usize) -> Self {
        self.leaf_order = leaf_order;
        self.internal_order = internal_order;
        self
    }

    pub fn with_delayed_merge(mut self, enabled: bool) -> Self {
        self.delayed_merge = enabled;
        self
    }

    pub fn with_eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }

    pub fn with_max_tables(mut self, max_tables: usize) -> Self {
        self.max_tables = max_tables;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.leaf_order, 32);
        assert_eq!(config.internal_order, 249);
        assert_eq!(config.tree_options(), TreeOptions::default());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "pool_capacity": 8, "eviction": "mru" }"#).unwrap();
        assert_eq!(config.pool_capacity, 8);
        assert_eq!(config.eviction, EvictionPolicy::Mru);
        assert_eq!(config.max_tables, 16);
        assert!(!config.delayed_merge);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad = [
            EngineConfig::default().with_pool_capacity(0),
            EngineConfig::default().with_max_tables(0),
            EngineConfig::default().with_orders(2, 249),
            EngineConfig::default().with_orders(32, 250),
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("engine.json");

        let config = EngineConfig::default()
            .with_pool_capacity(32)
            .with_orders(4, 5)
            .with_delayed_merge(true);
        config.save(&path).unwrap();

        assert_eq!(EngineConfig::from_json_file(&path).unwrap(), config);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("engine.json");

        fs::write(&path, r#"{ "leaf_order": 100 }"#).unwrap();
        assert!(matches!(
            EngineConfig::from_json_file(&path),
            Err(ConfigError::Invalid(_))
        ));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            EngineConfig::from_json_file(&path),
            Err(ConfigError::JsonError(_))
        ));
    }
}
