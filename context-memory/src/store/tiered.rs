//! Tiered context storage with a front cache over a durable store
//!
//! Cache flow:
//! 1. Read: cache hit → return | miss → durable read → fill cache → return
//! 2. Write: drop cache entry → durable write → rebuild entry from the retained
//!    record; on failure the entry stays dropped
//!
//! The durable tier is always written first, so a cache entry never holds a
//! message the durable tier does not.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::message::Message;
use crate::project::{AiName, ContextKey, ProjectKey};

use super::cache::FrontCache;
use super::traits::{AiSummary, BackendKind, CacheStats, ContextStore, ContextUpdate, StoreLease};

/// Front cache layered over a durable [`ContextStore`]
pub struct TieredContextStore<D> {
    durable: D,
    cache: FrontCache,
}

impl<D: ContextStore> TieredContextStore<D> {
    /// Wrap `durable` with `cache`.
    pub fn new(durable: D, cache: FrontCache) -> Self {
        Self { durable, cache }
    }

    /// The durable tier
    pub fn durable(&self) -> &D {
        &self.durable
    }

    /// The front cache
    pub fn cache(&self) -> &FrontCache {
        &self.cache
    }
}

#[async_trait]
impl<D: ContextStore> ContextStore for TieredContextStore<D> {
    fn kind(&self) -> BackendKind {
        BackendKind::Tiered
    }

    async fn read(&self, key: &ContextKey, window: usize) -> Result<Vec<Message>> {
        if let Some(messages) = self.cache.get(key, window) {
            debug!("Front cache hit for {}", key);
            return Ok(messages);
        }

        let ticket = self.cache.begin_fill();
        let fetch = window.max(self.cache.capacity());
        let mut messages = self.durable.read(key, fetch).await?;
        self.cache
            .fill(key, ticket, &messages, messages.len() < fetch);

        if messages.len() > window {
            messages.drain(..messages.len() - window);
        }
        Ok(messages)
    }

    async fn write(&self, key: &ContextKey, update: &ContextUpdate) -> Result<()> {
        let pending = self.cache.begin_write(key);
        match self.durable.write(key, update).await {
            Ok(()) => {
                self.cache.finish_write(key, pending, update);
                Ok(())
            },
            Err(e) => {
                warn!("Durable write failed for {}, dropping cache entry", key);
                self.cache.invalidate(key);
                Err(e)
            },
        }
    }

    async fn delete(&self, key: &ContextKey) -> Result<bool> {
        let result = self.durable.delete(key).await;
        self.cache.invalidate(key);
        result
    }

    async fn lease(&self, key: &ContextKey) -> Result<StoreLease> {
        self.durable.lease(key).await
    }

    async fn quarantine(&self, key: &ContextKey) -> Result<()> {
        let result = self.durable.quarantine(key).await;
        self.cache.invalidate(key);
        result
    }

    async fn list_projects(&self) -> Result<Vec<ProjectKey>> {
        self.durable.list_projects().await
    }

    async fn list_ais(&self, project: &ProjectKey) -> Result<Vec<AiName>> {
        self.durable.list_ais(project).await
    }

    async fn summarize(&self, project: &ProjectKey) -> Result<Vec<AiSummary>> {
        self.durable.summarize(project).await
    }

    async fn stale_keys(&self, cutoff: DateTime<Utc>) -> Result<Vec<ContextKey>> {
        self.durable.stale_keys(cutoff).await
    }

    async fn delete_if_stale(&self, key: &ContextKey, cutoff: DateTime<Utc>) -> Result<bool> {
        let result = self.durable.delete_if_stale(key, cutoff).await;
        if !matches!(result, Ok(false)) {
            self.cache.invalidate(key);
        }
        result
    }

    fn sweep_cache(&self) -> usize {
        self.cache.sweep_expired()
    }

    async fn health(&self) -> Result<()> {
        self.durable.health().await
    }

    fn cache_stats(&self) -> Option<CacheStats> {
        Some(self.cache.stats())
    }
}
