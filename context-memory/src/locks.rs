//! Per-key async locks

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::project::ContextKey;

/// One async mutex per context key
///
/// Operations on different keys never contend. Entries are created on first
/// use and dropped by [`KeyLocks::prune`] once nobody holds or waits on them.
#[derive(Default)]
pub struct KeyLocks {
    locks: DashMap<ContextKey, Arc<Mutex<()>>>,
}

impl KeyLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &ContextKey) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop entries that are neither held nor awaited. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no keys are tracked
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{AiName, ProjectKey};
    use std::time::Duration;

    fn key(ai: &str) -> ContextKey {
        ContextKey::new(
            ProjectKey::from_path("/locks/test").unwrap(),
            AiName::parse(ai).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyLocks::new());
        let guard = locks.acquire(&key("gemini")).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&key("gemini")).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_contend() {
        let locks = KeyLocks::new();
        let _a = locks.acquire(&key("gemini")).await;
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.acquire(&key("grok")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = KeyLocks::new();
        let held = locks.acquire(&key("gemini")).await;
        drop(locks.acquire(&key("grok")).await);

        assert_eq!(locks.len(), 2);
        assert_eq!(locks.prune(), 1);
        assert_eq!(locks.len(), 1);

        drop(held);
        assert_eq!(locks.prune(), 1);
        assert!(locks.is_empty());
    }
}
