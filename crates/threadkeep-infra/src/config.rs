//! Configuration loader and data directory resolution for ThreadKeep.
//!
//! Reads `config.toml` from the data directory (`~/.threadkeep/` in
//! production) into [`ThreadKeepConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use threadkeep_types::config::ThreadKeepConfig;

use crate::sqlite::pool::default_database_url;

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `THREADKEEP_DATA_DIR` environment variable
/// 2. `~/.threadkeep`
/// 3. `.threadkeep` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("THREADKEEP_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".threadkeep");
    }

    PathBuf::from(".threadkeep")
}

/// Load configuration from `{data_dir}/config.toml`.
///
/// - Missing file: defaults.
/// - Unreadable or unparsable file: logs a warning and returns defaults.
pub async fn load_config(data_dir: &Path) -> ThreadKeepConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return ThreadKeepConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return ThreadKeepConfig::default();
        }
    };

    match toml::from_str::<ThreadKeepConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            ThreadKeepConfig::default()
        }
    }
}

/// Database URL to open: the configured one, or `{data_dir}/threadkeep.db`.
pub fn database_url(config: &ThreadKeepConfig, data_dir: &Path) -> String {
    config
        .store
        .database_url
        .clone()
        .unwrap_or_else(|| default_database_url(data_dir))
}
