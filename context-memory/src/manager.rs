//! Context manager
//!
//! Loads, appends, prunes and clears the bounded history of each
//! (project, AI) pair. All mutations of one key are serialized: in-process by
//! [`KeyLocks`], across processes by the backend's lease.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::{ContextError, Result};
use crate::locks::KeyLocks;
use crate::message::{Message, retain_recent};
use crate::project::{AiName, ClearTarget, ContextKey, ProjectKey};
use crate::store::{
    AiSummary, BackendKind, CacheStats, ContextStore, ContextUpdate, StorageConfig, open_store,
};

/// Default number of messages kept per (project, AI)
pub const DEFAULT_RETENTION_LIMIT: usize = 20;

/// Default number of results returned by [`ContextManager::search`]
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Manager settings
#[derive(Clone, Debug)]
pub struct ContextConfig {
    /// Messages kept per key; the oldest are dropped first
    pub retention_limit: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            retention_limit: DEFAULT_RETENTION_LIMIT,
        }
    }
}

impl ContextConfig {
    /// Reject settings the manager cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.retention_limit == 0 {
            return Err(ContextError::Config(
                "retention_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-project, per-AI conversation memory
pub struct ContextManager {
    store: Arc<dyn ContextStore>,
    config: ContextConfig,
    locks: KeyLocks,
}

impl ContextManager {
    /// Create a manager over an already opened store.
    pub fn new(store: Arc<dyn ContextStore>, config: ContextConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            locks: KeyLocks::new(),
        })
    }

    /// Open the configured backend and create a manager over it.
    pub async fn open(storage: &StorageConfig, config: ContextConfig) -> Result<Self> {
        config.validate()?;
        let store = open_store(storage, config.retention_limit).await?;
        Self::new(store, config)
    }

    /// Create a builder
    pub fn builder() -> ContextManagerBuilder {
        ContextManagerBuilder::default()
    }

    /// Messages kept per key
    pub fn retention_limit(&self) -> usize {
        self.config.retention_limit
    }

    /// Active backend
    pub fn backend(&self) -> BackendKind {
        self.store.kind()
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn ContextStore> {
        &self.store
    }

    /// Current history for `ai` in `project`, oldest first.
    ///
    /// A pair that was never used yields an empty history. So does a corrupt
    /// record, which is moved aside first.
    pub async fn get_context(&self, project: &ProjectKey, ai: &AiName) -> Result<Vec<Message>> {
        let key = ContextKey::new(project.clone(), ai.clone());
        match self.store.read(&key, self.config.retention_limit).await {
            Ok(messages) => Ok(messages),
            Err(e) if e.is_corrupt() => {
                let _guard = self.locks.acquire(&key).await;
                let _lease = self.store.lease(&key).await?;
                self.read_or_quarantine(&key).await
            },
            Err(e) => Err(e),
        }
    }

    /// Append `messages` to the history of `ai` in `project` and persist it.
    ///
    /// The result is truncated to the retention limit. Readers observe either
    /// the previous or the updated history, never a mix. An empty batch is a
    /// no-op.
    pub async fn append_and_persist(
        &self,
        project: &ProjectKey,
        ai: &AiName,
        messages: Vec<Message>,
    ) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let key = ContextKey::new(project.clone(), ai.clone());
        let _guard = self.locks.acquire(&key).await;
        let _lease = self.store.lease(&key).await?;

        let mut retained = self.read_or_quarantine(&key).await?;
        retained.extend(messages.iter().cloned());
        retain_recent(&mut retained, self.config.retention_limit);

        let update = ContextUpdate {
            appended: messages,
            retained,
        };
        if let Err(e) = self.store.write(&key, &update).await {
            warn!("Failed to persist context for {}: {}", key, e);
            return Err(e);
        }

        debug!(
            "Appended {} messages to {} ({} retained)",
            update.appended.len(),
            key,
            update.retained.len()
        );
        Ok(())
    }

    /// Record one prompt/response exchange.
    pub async fn record_turn(
        &self,
        project: &ProjectKey,
        ai: &AiName,
        prompt: impl Into<String>,
        response: impl Into<String>,
    ) -> Result<()> {
        let messages = vec![Message::user(prompt), Message::assistant(response)];
        self.append_and_persist(project, ai, messages).await
    }

    /// Remove stored context. Returns how many records were removed.
    ///
    /// [`ClearTarget::All`] clears every AI of `project` and nothing else.
    pub async fn clear(&self, project: &ProjectKey, target: &ClearTarget) -> Result<usize> {
        let ais = match target {
            ClearTarget::Ai(ai) => vec![ai.clone()],
            ClearTarget::All => self.store.list_ais(project).await?,
        };

        let mut removed = 0;
        for ai in ais {
            let key = ContextKey::new(project.clone(), ai);
            let _guard = self.locks.acquire(&key).await;
            let _lease = self.store.lease(&key).await?;
            if self.store.delete(&key).await? {
                removed += 1;
            }
        }

        info!("Cleared {} context records in project {}", removed, project);
        Ok(removed)
    }

    /// Projects with stored context
    pub async fn list_projects(&self) -> Result<Vec<ProjectKey>> {
        self.store.list_projects().await
    }

    /// AIs with stored context in `project`
    pub async fn list_ais(&self, project: &ProjectKey) -> Result<Vec<AiName>> {
        self.store.list_ais(project).await
    }

    /// Message count and last update of every AI in `project`, most recently
    /// updated first.
    ///
    /// Counts are what the backend holds: the retained window for files, the
    /// full history for SQLite.
    pub async fn project_info(&self, project: &ProjectKey) -> Result<Vec<AiSummary>> {
        self.store.summarize(project).await
    }

    /// Messages in the history of `ai` containing `query`, newest first.
    ///
    /// Matching is a case-insensitive substring test.
    pub async fn search(
        &self,
        project: &ProjectKey,
        ai: &AiName,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let needle = query.to_lowercase();
        let history = self.get_context(project, ai).await?;
        Ok(history
            .into_iter()
            .rev()
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .take(limit)
            .collect())
    }

    /// Remove records not updated within `max_age`. Returns how many were removed.
    ///
    /// Each candidate is removed under its key lock and lease, and only if it
    /// is still stale by then.
    pub async fn purge_stale(&self, max_age: Duration) -> Result<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| ContextError::Config(format!("stale age out of range: {e}")))?;
        let cutoff = Utc::now() - max_age;

        let mut removed = 0;
        for key in self.store.stale_keys(cutoff).await? {
            let _guard = self.locks.acquire(&key).await;
            let _lease = self.store.lease(&key).await?;
            if self.store.delete_if_stale(&key, cutoff).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Purged {} stale context records", removed);
        }

        let swept = self.store.sweep_cache();
        let pruned = self.locks.prune();
        debug!("Swept {} cache entries, pruned {} idle key locks", swept, pruned);
        Ok(removed)
    }

    /// Check that the backend is reachable.
    pub async fn health(&self) -> Result<()> {
        self.store.health().await
    }

    /// Front-cache counters, for the tiered backend
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.store.cache_stats()
    }

    /// Read the current window, moving a corrupt record aside.
    ///
    /// Callers hold the key's lock.
    async fn read_or_quarantine(&self, key: &ContextKey) -> Result<Vec<Message>> {
        match self.store.read(key, self.config.retention_limit).await {
            Ok(messages) => Ok(messages),
            Err(ContextError::CorruptRecord { location, reason }) => {
                warn!(
                    "Corrupt context record at {} ({}), starting fresh history for {}",
                    location, reason, key
                );
                self.store.quarantine(key).await?;
                Ok(Vec::new())
            },
            Err(e) => Err(e),
        }
    }
}

/// Builder for [`ContextManager`]
#[derive(Default)]
pub struct ContextManagerBuilder {
    storage: Option<StorageConfig>,
    store: Option<Arc<dyn ContextStore>>,
    config: ContextConfig,
}

impl ContextManagerBuilder {
    /// Open this backend configuration on build
    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Use an already opened store
    pub fn store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the retention limit
    pub fn retention_limit(mut self, limit: usize) -> Self {
        self.config.retention_limit = limit;
        self
    }

    /// Build the manager
    pub async fn build(self) -> Result<ContextManager> {
        match (self.store, self.storage) {
            (Some(store), _) => ContextManager::new(store, self.config),
            (None, Some(storage)) => ContextManager::open(&storage, self.config).await,
            (None, None) => Err(ContextError::Config(
                "no storage backend configured".to_string(),
            )),
        }
    }
}
