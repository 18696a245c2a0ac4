//! Shared helpers for the context-memory integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use context_memory::store::{
    AiSummary, BackendKind, CacheStats, ContextStore, ContextUpdate, FileContextStore,
    FrontCache, SqliteContextStore, StoreLease, TieredContextStore,
};
use context_memory::{
    AiName, ContextConfig, ContextError, ContextKey, ContextManager, Message, ProjectKey, Result,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Store wrapper whose writes fail while the switch is on.
pub struct FlakyStore<S> {
    inner: S,
    fail_writes: Arc<AtomicBool>,
}

impl<S> FlakyStore<S> {
    pub fn new(inner: S, fail_writes: Arc<AtomicBool>) -> Self {
        Self { inner, fail_writes }
    }
}

#[async_trait]
impl<S: ContextStore> ContextStore for FlakyStore<S> {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn read(&self, key: &ContextKey, window: usize) -> Result<Vec<Message>> {
        self.inner.read(key, window).await
    }

    async fn write(&self, key: &ContextKey, update: &ContextUpdate) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ContextError::StorageUnavailable(
                "injected write failure".to_string(),
            ));
        }
        self.inner.write(key, update).await
    }

    async fn delete(&self, key: &ContextKey) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn lease(&self, key: &ContextKey) -> Result<StoreLease> {
        self.inner.lease(key).await
    }

    async fn quarantine(&self, key: &ContextKey) -> Result<()> {
        self.inner.quarantine(key).await
    }

    async fn list_projects(&self) -> Result<Vec<ProjectKey>> {
        self.inner.list_projects().await
    }

    async fn list_ais(&self, project: &ProjectKey) -> Result<Vec<AiName>> {
        self.inner.list_ais(project).await
    }

    async fn summarize(&self, project: &ProjectKey) -> Result<Vec<AiSummary>> {
        self.inner.summarize(project).await
    }

    async fn stale_keys(&self, cutoff: DateTime<Utc>) -> Result<Vec<ContextKey>> {
        self.inner.stale_keys(cutoff).await
    }

    async fn delete_if_stale(&self, key: &ContextKey, cutoff: DateTime<Utc>) -> Result<bool> {
        self.inner.delete_if_stale(key, cutoff).await
    }

    async fn health(&self) -> Result<()> {
        self.inner.health().await
    }

    fn sweep_cache(&self) -> usize {
        self.inner.sweep_cache()
    }

    fn cache_stats(&self) -> Option<CacheStats> {
        self.inner.cache_stats()
    }
}

/// Store wrapper whose writes stall before reaching the inner store and again
/// before returning.
pub struct SlowStore<S> {
    inner: S,
    before_write: Duration,
    after_write: Duration,
}

impl<S> SlowStore<S> {
    pub fn new(inner: S, before_write: Duration, after_write: Duration) -> Self {
        Self {
            inner,
            before_write,
            after_write,
        }
    }
}

#[async_trait]
impl<S: ContextStore> ContextStore for SlowStore<S> {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn read(&self, key: &ContextKey, window: usize) -> Result<Vec<Message>> {
        self.inner.read(key, window).await
    }

    async fn write(&self, key: &ContextKey, update: &ContextUpdate) -> Result<()> {
        tokio::time::sleep(self.before_write).await;
        self.inner.write(key, update).await?;
        tokio::time::sleep(self.after_write).await;
        Ok(())
    }

    async fn delete(&self, key: &ContextKey) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn lease(&self, key: &ContextKey) -> Result<StoreLease> {
        self.inner.lease(key).await
    }

    async fn quarantine(&self, key: &ContextKey) -> Result<()> {
        self.inner.quarantine(key).await
    }

    async fn list_projects(&self) -> Result<Vec<ProjectKey>> {
        self.inner.list_projects().await
    }

    async fn list_ais(&self, project: &ProjectKey) -> Result<Vec<AiName>> {
        self.inner.list_ais(project).await
    }

    async fn summarize(&self, project: &ProjectKey) -> Result<Vec<AiSummary>> {
        self.inner.summarize(project).await
    }

    async fn stale_keys(&self, cutoff: DateTime<Utc>) -> Result<Vec<ContextKey>> {
        self.inner.stale_keys(cutoff).await
    }

    async fn delete_if_stale(&self, key: &ContextKey, cutoff: DateTime<Utc>) -> Result<bool> {
        self.inner.delete_if_stale(key, cutoff).await
    }

    async fn health(&self) -> Result<()> {
        self.inner.health().await
    }
}

/// A manager over a fresh backend in a temporary directory.
pub struct Harness {
    pub manager: Arc<ContextManager>,
    pub fail_writes: Arc<AtomicBool>,
    pub temp: TempDir,
}

impl Harness {
    pub async fn new(kind: BackendKind, retention_limit: usize) -> Self {
        let temp = TempDir::new().unwrap();
        let fail_writes = Arc::new(AtomicBool::new(false));
        let store = open_flaky(kind, &temp, retention_limit, fail_writes.clone()).await;
        let manager = ContextManager::new(store, ContextConfig { retention_limit }).unwrap();
        Self {
            manager: Arc::new(manager),
            fail_writes,
            temp,
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

/// Open `kind` under `temp`. For the tiered backend the failure switch sits
/// below the cache, on the durable tier.
pub async fn open_flaky(
    kind: BackendKind,
    temp: &TempDir,
    retention_limit: usize,
    fail_writes: Arc<AtomicBool>,
) -> Arc<dyn ContextStore> {
    let db_path = temp.path().join("context.db");
    match kind {
        BackendKind::File => {
            let store = FileContextStore::new(temp.path().join("contexts")).unwrap();
            Arc::new(FlakyStore::new(store, fail_writes))
        },
        BackendKind::Sqlite => {
            let store = SqliteContextStore::open(db_path).await.unwrap();
            Arc::new(FlakyStore::new(store, fail_writes))
        },
        BackendKind::Tiered => {
            let durable = SqliteContextStore::open(db_path).await.unwrap();
            Arc::new(TieredContextStore::new(
                FlakyStore::new(durable, fail_writes),
                FrontCache::new(Duration::from_secs(3600), retention_limit, 1000),
            ))
        },
    }
}

pub fn project(path: &str) -> ProjectKey {
    ProjectKey::from_path(path).unwrap()
}

pub fn ai(name: &str) -> AiName {
    AiName::parse(name).unwrap()
}

pub fn contents(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.content.clone()).collect()
}
