//! Configuration types for ThreadKeep.
//!
//! `ThreadKeepConfig` represents the top-level `config.toml`: which store
//! backend to use and the threading policies the service applies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.threadkeep/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadKeepConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub threading: ThreadingConfig,
}

/// Where chats are persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection URL for the SQLite backend. `None` means
    /// `{data_dir}/threadkeep.db`.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Version segment of the per-user index keys.
    #[serde(default = "default_key_version")]
    pub key_version: String,
}

fn default_key_version() -> String {
    "v2".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            database_url: None,
            key_version: default_key_version(),
        }
    }
}

/// Threading policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadingConfig {
    #[serde(default)]
    pub orphan_policy: OrphanPolicy,

    #[serde(default)]
    pub message_blob_policy: MessageBlobPolicy,

    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Depth limit when loading a thread tree.
    #[serde(default = "default_max_tree_depth")]
    pub max_tree_depth: u32,
}

fn default_page_size() -> usize {
    20
}

fn default_max_tree_depth() -> u32 {
    32
}

impl Default for ThreadingConfig {
    fn default() -> Self {
        Self {
            orphan_policy: OrphanPolicy::default(),
            message_blob_policy: MessageBlobPolicy::default(),
            default_page_size: default_page_size(),
            max_tree_depth: default_max_tree_depth(),
        }
    }
}

/// Store backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Sqlite => write!(f, "sqlite"),
            StoreBackend::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("invalid store backend: '{other}'")),
        }
    }
}

/// What happens to the children of a deleted chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Direct children become roots of their own threads.
    #[default]
    Promote,
    /// The whole subtree is deleted along with the chat.
    Cascade,
}

impl fmt::Display for OrphanPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrphanPolicy::Promote => write!(f, "promote"),
            OrphanPolicy::Cascade => write!(f, "cascade"),
        }
    }
}

impl FromStr for OrphanPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "promote" => Ok(OrphanPolicy::Promote),
            "cascade" => Ok(OrphanPolicy::Cascade),
            other => Err(format!("invalid orphan policy: '{other}'")),
        }
    }
}

/// How an unparsable stored message blob is read back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageBlobPolicy {
    /// Read as an empty message sequence and log a warning.
    #[default]
    Degrade,
    /// Fail the read with a serialization error.
    Strict,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = ThreadKeepConfig::default();
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.store.key_version, "v2");
        assert!(config.store.database_url.is_none());
        assert_eq!(config.threading.orphan_policy, OrphanPolicy::Promote);
        assert_eq!(config.threading.message_blob_policy, MessageBlobPolicy::Degrade);
        assert_eq!(config.threading.default_page_size, 20);
        assert_eq!(config.threading.max_tree_depth, 32);
    }

    #[test]
    fn test_config_deserialize_empty_uses_defaults() {
        let config: ThreadKeepConfig = toml::from_str("").unwrap();
        assert_eq!(config, ThreadKeepConfig::default());
    }

    #[test]
    fn test_config_deserialize_with_values() {
        let toml_str = r#"
[store]
backend = "memory"
key_version = "v3"

[threading]
orphan_policy = "cascade"
message_blob_policy = "strict"
default_page_size = 50
"#;
        let config: ThreadKeepConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.key_version, "v3");
        assert_eq!(config.threading.orphan_policy, OrphanPolicy::Cascade);
        assert_eq!(config.threading.message_blob_policy, MessageBlobPolicy::Strict);
        assert_eq!(config.threading.default_page_size, 50);
        // Unset field keeps its default
        assert_eq!(config.threading.max_tree_depth, 32);
    }

    #[test]
    fn test_orphan_policy_roundtrip() {
        for policy in [OrphanPolicy::Promote, OrphanPolicy::Cascade] {
            let parsed: OrphanPolicy = policy.to_string().parse().unwrap();
            assert_eq!(policy, parsed);
        }
        assert!("reparent".parse::<OrphanPolicy>().is_err());
    }

    #[test]
    fn test_store_backend_from_str_is_case_insensitive() {
        assert_eq!("SQLite".parse::<StoreBackend>().unwrap(), StoreBackend::Sqlite);
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("redis".parse::<StoreBackend>().is_err());
    }
}
