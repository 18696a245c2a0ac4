//! Storage trait definitions
//!
//! These traits define the interface for context backends. The manager only
//! ever holds an `Arc<dyn ContextStore>`, so the backend choice is pure
//! configuration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::str::FromStr;

use crate::errors::{ContextError, Result};
use crate::message::Message;
use crate::project::{AiName, ContextKey, ProjectKey};

/// A pending change to one context record
///
/// `retained` is the complete bounded record after pruning and `appended` is
/// the tail that was just added. Whole-record backends persist `retained`;
/// append-only backends persist `appended`.
#[derive(Clone, Debug, Default)]
pub struct ContextUpdate {
    /// Messages added by this update, oldest first
    pub appended: Vec<Message>,
    /// Full record after the retention limit was applied
    pub retained: Vec<Message>,
}

/// Exclusive cross-process hold on one key, released on drop
#[derive(Debug, Default)]
pub struct StoreLease {
    lock_file: Option<File>,
}

impl StoreLease {
    /// A lease that holds nothing, for backends without cross-process locks
    pub fn none() -> Self {
        Self::default()
    }

    #[cfg_attr(not(unix), allow(dead_code))]
    pub(crate) fn from_file(file: File) -> Self {
        Self {
            lock_file: Some(file),
        }
    }

    /// Whether an OS-level lock is held
    pub fn is_held(&self) -> bool {
        self.lock_file.is_some()
    }
}

/// Stored history of one AI in a project
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AiSummary {
    /// The AI
    pub ai: AiName,
    /// Messages the backend holds for it
    pub message_count: usize,
    /// Last successful write
    pub updated_at: DateTime<Utc>,
}

/// Which backend implementation is active
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One JSON file per (project, AI)
    File,
    /// SQLite sessions and messages tables
    Sqlite,
    /// Front cache over SQLite
    Tiered,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::File => "file",
            BackendKind::Sqlite => "sqlite",
            BackendKind::Tiered => "tiered",
        };
        f.write_str(name)
    }
}

impl FromStr for BackendKind {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "files" => Ok(BackendKind::File),
            "sqlite" | "sql" => Ok(BackendKind::Sqlite),
            "tiered" | "cache+sqlite" => Ok(BackendKind::Tiered),
            other => Err(ContextError::Config(format!(
                "unknown storage backend '{other}' (expected file, sqlite or tiered)"
            ))),
        }
    }
}

/// Front-cache counters
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Live entries
    pub entries: usize,
    /// Reads served from the cache
    pub hits: usize,
    /// Reads that fell through to the durable store
    pub misses: usize,
    /// hits / (hits + misses)
    pub hit_rate: f64,
}

/// Trait for context storage backends
///
/// Implementations must be thread-safe (Send + Sync) as they are shared across
/// request tasks. Every method translates backend failures into
/// [`ContextError`]; a missing record is never an error.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Which implementation this is
    fn kind(&self) -> BackendKind;

    /// Read the most recent `window` messages of a record, oldest first.
    async fn read(&self, key: &ContextKey, window: usize) -> Result<Vec<Message>>;

    /// Persist an update so that readers see either the old or the new record.
    async fn write(&self, key: &ContextKey, update: &ContextUpdate) -> Result<()>;

    /// Remove a record. Returns `false` when there was nothing to remove.
    async fn delete(&self, key: &ContextKey) -> Result<bool>;

    /// Take the backend's cross-process lock on `key`.
    async fn lease(&self, _key: &ContextKey) -> Result<StoreLease> {
        Ok(StoreLease::none())
    }

    /// Move an unreadable record aside so it is kept but no longer read.
    async fn quarantine(&self, key: &ContextKey) -> Result<()> {
        self.delete(key).await.map(|_| ())
    }

    /// List projects that have at least one record.
    async fn list_projects(&self) -> Result<Vec<ProjectKey>>;

    /// List AIs with a record in `project`.
    async fn list_ais(&self, project: &ProjectKey) -> Result<Vec<AiName>>;

    /// Per-AI summaries for `project`, most recently updated first.
    async fn summarize(&self, project: &ProjectKey) -> Result<Vec<AiSummary>>;

    /// Keys whose record was last updated before `cutoff`.
    async fn stale_keys(&self, cutoff: DateTime<Utc>) -> Result<Vec<ContextKey>>;

    /// Remove the record of `key` if it is still older than `cutoff`.
    ///
    /// Called with the key's lock and lease held, so a record refreshed since
    /// [`ContextStore::stale_keys`] listed it survives.
    async fn delete_if_stale(&self, key: &ContextKey, cutoff: DateTime<Utc>) -> Result<bool>;

    /// Drop expired front-cache entries. Returns how many were dropped.
    fn sweep_cache(&self) -> usize {
        0
    }

    /// Cheap liveness probe.
    async fn health(&self) -> Result<()> {
        Ok(())
    }

    /// Front-cache statistics, when the backend has a cache tier.
    fn cache_stats(&self) -> Option<CacheStats> {
        None
    }
}
