//! Storage backends for conversation context
//!
//! This module defines the [`ContextStore`] trait and its implementations,
//! allowing the manager to work with flat files, SQLite, or SQLite behind an
//! in-memory front cache.
//!
//! ## Available Backends
//!
//! - `file`: one JSON document per (project, AI), replaced atomically
//! - `sqlite`: sessions and messages tables, appended transactionally
//! - `tiered`: TTL front cache over `sqlite`

mod cache;
mod file;
mod sqlite;
mod tiered;
mod traits;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::errors::{ContextError, Result};

pub use cache::{CacheConfig, FrontCache, PendingWrite};
pub use file::FileContextStore;
pub use sqlite::SqliteContextStore;
pub use tiered::TieredContextStore;
pub use traits::*;

/// Which backend to open, and where
#[derive(Clone, Debug)]
pub enum StorageConfig {
    /// JSON files under `root`
    File {
        /// Directory holding one subdirectory per project
        root: PathBuf,
    },
    /// SQLite database at `path`
    Sqlite {
        /// Database file
        path: PathBuf,
    },
    /// Front cache over the SQLite database at `path`
    Tiered {
        /// Database file
        path: PathBuf,
        /// Front cache settings
        cache: CacheConfig,
    },
}

impl StorageConfig {
    /// Backend this configuration opens
    pub fn kind(&self) -> BackendKind {
        match self {
            StorageConfig::File { .. } => BackendKind::File,
            StorageConfig::Sqlite { .. } => BackendKind::Sqlite,
            StorageConfig::Tiered { .. } => BackendKind::Tiered,
        }
    }
}

/// Open the configured backend.
///
/// `retention_limit` sizes the front cache when no explicit window is set.
pub async fn open_store(
    config: &StorageConfig,
    retention_limit: usize,
) -> Result<Arc<dyn ContextStore>> {
    let store: Arc<dyn ContextStore> = match config {
        StorageConfig::File { root } => Arc::new(FileContextStore::new(root)?),
        StorageConfig::Sqlite { path } => Arc::new(SqliteContextStore::open(path.clone()).await?),
        StorageConfig::Tiered { path, cache } => {
            let window = cache.window.unwrap_or(retention_limit);
            if window == 0 || cache.max_entries == 0 {
                return Err(ContextError::Config(
                    "cache window and max entries must be at least 1".to_string(),
                ));
            }
            let durable = SqliteContextStore::open(path.clone()).await?;
            let front = FrontCache::new(cache.ttl, window, cache.max_entries);
            Arc::new(TieredContextStore::new(durable, front))
        },
    };

    info!("Context store ready: {}", store.kind());
    Ok(store)
}

/// Run blocking storage I/O off the async runtime.
pub(crate) async fn run_blocking<F, R>(operation: &'static str, f: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ContextError::storage(operation, e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_each_backend() {
        let temp = TempDir::new().unwrap();
        let configs = [
            StorageConfig::File {
                root: temp.path().join("contexts"),
            },
            StorageConfig::Sqlite {
                path: temp.path().join("plain.db"),
            },
            StorageConfig::Tiered {
                path: temp.path().join("tiered.db"),
                cache: CacheConfig::default(),
            },
        ];

        for config in &configs {
            let store = open_store(config, 20).await.unwrap();
            assert_eq!(store.kind(), config.kind());
            store.health().await.unwrap();
            assert_eq!(
                store.cache_stats().is_some(),
                config.kind() == BackendKind::Tiered
            );
        }
    }

    #[tokio::test]
    async fn test_zero_cache_window_rejected() {
        let temp = TempDir::new().unwrap();
        let config = StorageConfig::Tiered {
            path: temp.path().join("tiered.db"),
            cache: CacheConfig {
                window: Some(0),
                ..CacheConfig::default()
            },
        };
        assert!(matches!(
            open_store(&config, 20).await,
            Err(ContextError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_run_blocking_reports_panics_as_storage_errors() {
        let err = run_blocking("explode", || -> Result<()> { panic!("boom") })
            .await
            .unwrap_err();
        assert!(err.is_storage_unavailable());
    }
}
