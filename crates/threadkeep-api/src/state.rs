//! Application state wiring the chat service to the configured store.
//!
//! `ChatService` is generic over its store; `AppState` pins it to
//! [`AppStore`], which dispatches to whichever backend `config.toml`
//! selects.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use threadkeep_core::chat::service::ChatService;
use threadkeep_core::store::memory::MemoryThreadStore;
use threadkeep_core::store::{Command, CommandReply, ThreadStore};
use threadkeep_infra::config::{database_url, load_config, resolve_data_dir};
use threadkeep_infra::sqlite::pool::DatabasePool;
use threadkeep_infra::sqlite::store::SqliteThreadStore;
use threadkeep_types::config::{StoreBackend, ThreadKeepConfig};
use threadkeep_types::error::StoreError;

/// The store backend chosen at startup.
///
/// The memory backend lives only as long as the process.
#[derive(Clone)]
pub enum AppStore {
    Memory(MemoryThreadStore),
    Sqlite(SqliteThreadStore),
}

impl ThreadStore for AppStore {
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        match self {
            AppStore::Memory(store) => store.hgetall(key).await,
            AppStore::Sqlite(store) => store.hgetall(key).await,
        }
    }

    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        rev: bool,
    ) -> Result<Vec<String>, StoreError> {
        match self {
            AppStore::Memory(store) => store.zrange(key, start, stop, rev).await,
            AppStore::Sqlite(store) => store.zrange(key, start, stop, rev).await,
        }
    }

    async fn exec(&self, commands: Vec<Command>) -> Result<Vec<CommandReply>, StoreError> {
        match self {
            AppStore::Memory(store) => store.exec(commands).await,
            AppStore::Sqlite(store) => store.exec(commands).await,
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        match self {
            AppStore::Memory(store) => store.ping().await,
            AppStore::Sqlite(store) => store.ping().await,
        }
    }
}

pub type ConcreteChatService = ChatService<AppStore>;

/// Shared application state for CLI commands.
#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ConcreteChatService>,
    pub config: ThreadKeepConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory, load configuration, open the store.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let config = load_config(&data_dir).await;

        let store = match config.store.backend {
            StoreBackend::Memory => AppStore::Memory(MemoryThreadStore::new()),
            StoreBackend::Sqlite => {
                let url = database_url(&config, &data_dir);
                let pool = DatabasePool::new(&url)
                    .await
                    .with_context(|| format!("Failed to open database at {url}"))?;
                AppStore::Sqlite(SqliteThreadStore::new(pool))
            }
        };
        tracing::debug!(backend = %config.store.backend, "Store initialized");

        let chat_service = ChatService::new(store, &config);

        Ok(Self {
            chat_service: Arc::new(chat_service),
            config,
            data_dir,
        })
    }
}
