use context_memory::ContextManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Periodically purge stale records, sweep the front cache and prune idle locks.
pub fn spawn_maintenance(
    manager: Arc<ContextManager>,
    interval: Duration,
    stale_after: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            run_once(&manager, stale_after).await;
        }
    })
}

pub async fn run_once(manager: &ContextManager, stale_after: Duration) {
    match manager.purge_stale(stale_after).await {
        Ok(0) => debug!("Maintenance: no stale context records"),
        Ok(removed) => info!("Maintenance: purged {} stale context records", removed),
        Err(e) => warn!("Maintenance purge failed: {}", e),
    }

    if let Some(stats) = manager.cache_stats() {
        debug!(
            "Front cache: {} entries, hit rate {:.2}",
            stats.entries, stats.hit_rate
        );
    }
}
