//! In-memory front cache for context windows
//!
//! Each entry holds the most recent messages of one record, up to the cache
//! window, plus a flag telling whether older messages exist in the durable
//! tier. A lookup is only a hit when the entry can answer the requested window
//! on its own.
//!
//! Read-through fills carry a tick from a cache-wide clock. Every write or
//! invalidation stamps its key with a newer tick, and a fill whose tick is not
//! newer than the key's stamp is discarded instead of resurrecting stale
//! data. Stamps of keys without an entry are folded into a single floor, so
//! the stamp table stays as small as the entry table.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::message::Message;
use crate::project::ContextKey;

use super::traits::{CacheStats, ContextUpdate};

/// Front cache settings
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// How long an entry stays valid after it was filled
    pub ttl: Duration,
    /// Messages kept per entry; `None` uses the retention limit
    pub window: Option<usize>,
    /// Maximum live entries before the oldest is evicted
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            window: None,
            max_entries: 1000,
        }
    }
}

#[derive(Clone)]
struct CachedWindow {
    messages: Vec<Message>,
    /// Older messages exist in the durable tier
    truncated: bool,
    created_at: Instant,
    hit_count: usize,
}

impl CachedWindow {
    fn new(mut messages: Vec<Message>, mut truncated: bool, capacity: usize) -> Self {
        if messages.len() > capacity {
            messages.drain(..messages.len() - capacity);
            truncated = true;
        }
        Self {
            messages,
            truncated,
            created_at: Instant::now(),
            hit_count: 0,
        }
    }

    fn covers(&self, window: usize) -> bool {
        !self.truncated || self.messages.len() >= window
    }

    fn tail(&self, window: usize) -> Vec<Message> {
        let skip = self.messages.len().saturating_sub(window);
        self.messages[skip..].to_vec()
    }
}

/// Handle for a write in progress, from [`FrontCache::begin_write`]
#[derive(Debug)]
pub struct PendingWrite {
    /// Length of the record when the cache held all of it
    known_len: Option<usize>,
}

/// TTL-bounded cache of recent messages keyed by (project, AI)
pub struct FrontCache {
    entries: DashMap<ContextKey, CachedWindow>,
    /// Tick of the last write or invalidation per key
    stamps: DashMap<ContextKey, u64>,
    /// Newest stamp ever pruned from `stamps`
    floor: AtomicU64,
    clock: AtomicU64,
    ttl: Duration,
    capacity: usize,
    max_entries: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl FrontCache {
    /// Create a cache holding up to `capacity` messages per key.
    pub fn new(ttl: Duration, capacity: usize, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            stamps: DashMap::new(),
            floor: AtomicU64::new(0),
            clock: AtomicU64::new(0),
            ttl,
            capacity: capacity.max(1),
            max_entries: max_entries.max(1),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Messages kept per entry
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Look up the most recent `window` messages for `key`.
    pub fn get(&self, key: &ContextKey, window: usize) -> Option<Vec<Message>> {
        let found = self.lookup(key, window);
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    fn lookup(&self, key: &ContextKey, window: usize) -> Option<Vec<Message>> {
        let mut entry = self.entries.get_mut(key)?;

        if entry.created_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        if !entry.covers(window) {
            return None;
        }

        entry.hit_count += 1;
        Some(entry.tail(window))
    }

    /// Tick to pass to [`FrontCache::fill`], taken before a durable read.
    pub fn begin_fill(&self) -> u64 {
        self.tick()
    }

    /// Populate `key` from a durable read started at `ticket`.
    ///
    /// `complete` means `messages` is the whole record. The fill is dropped if
    /// the key was written or invalidated since `ticket` was taken.
    pub fn fill(&self, key: &ContextKey, ticket: u64, messages: &[Message], complete: bool) {
        self.make_room(key);

        let stamp = self.stamps.entry(key.clone()).or_insert(0);
        if (*stamp).max(self.floor.load(Ordering::SeqCst)) >= ticket {
            debug!("Discarding stale cache fill for {}", key);
            return;
        }
        self.entries.insert(
            key.clone(),
            CachedWindow::new(messages.to_vec(), !complete, self.capacity),
        );
        // A concurrent clear may have raised the floor after the check.
        if self.floor.load(Ordering::SeqCst) >= ticket {
            self.entries.remove(key);
        }
    }

    /// Drop the entry for `key` before its durable write starts.
    ///
    /// Fills that began earlier are rejected from here on, and the entry stays
    /// empty until [`FrontCache::finish_write`].
    pub fn begin_write(&self, key: &ContextKey) -> PendingWrite {
        let mut stamp = self.stamps.entry(key.clone()).or_insert(0);
        *stamp = self.tick();
        let known_len = self
            .entries
            .remove(key)
            .map(|(_, entry)| entry)
            .filter(|entry| !entry.truncated && entry.created_at.elapsed() <= self.ttl)
            .map(|entry| entry.messages.len());
        PendingWrite { known_len }
    }

    /// Rebuild the entry for `key` from a committed write.
    ///
    /// The entry is the retained record, never an extension of what the cache
    /// held, so a fill that raced the write cannot duplicate messages. It only
    /// claims to be the whole record when the cache held the whole record
    /// before and nothing was pruned.
    pub fn finish_write(&self, key: &ContextKey, pending: PendingWrite, update: &ContextUpdate) {
        self.make_room(key);

        let complete = pending
            .known_len
            .is_some_and(|len| len + update.appended.len() == update.retained.len());

        let mut stamp = self.stamps.entry(key.clone()).or_insert(0);
        *stamp = self.tick();
        self.entries.insert(
            key.clone(),
            CachedWindow::new(update.retained.clone(), !complete, self.capacity),
        );
    }

    /// Drop the entry for `key` and reject in-flight fills.
    pub fn invalidate(&self, key: &ContextKey) {
        let mut stamp = self.stamps.entry(key.clone()).or_insert(0);
        *stamp = self.tick();
        self.entries.remove(key);
    }

    /// Drop every entry and reject all in-flight fills.
    pub fn clear(&self) {
        let tick = self.tick();
        self.floor.fetch_max(tick, Ordering::SeqCst);
        self.entries.clear();
        self.stamps.clear();
    }

    /// Remove entries older than the TTL. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.created_at.elapsed() <= self.ttl);
        let removed = before.saturating_sub(self.entries.len());
        self.prune_stamps();
        debug!(
            "Front cache sweep: removed {}, {} entries remaining",
            removed,
            self.entries.len()
        );
        removed
    }

    /// Fold the stamps of keys without an entry into the floor.
    fn prune_stamps(&self) {
        self.stamps.retain(|key, stamp| {
            if self.entries.contains_key(key) {
                return true;
            }
            self.floor.fetch_max(*stamp, Ordering::SeqCst);
            false
        });
    }

    fn make_room(&self, key: &ContextKey) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(key) {
            self.evict_oldest();
        }
        if self.stamps.len() > self.max_entries * 2 {
            self.prune_stamps();
        }
    }

    fn evict_oldest(&self) {
        let mut oldest_key = None;
        let mut oldest_time = Instant::now();

        for entry in self.entries.iter() {
            if entry.value().created_at <= oldest_time {
                oldest_time = entry.value().created_at;
                oldest_key = Some(entry.key().clone());
            }
        }

        if let Some(key) = oldest_key {
            self.entries.remove(&key);
            if let Some((_, stamp)) = self.stamps.remove(&key) {
                self.floor.fetch_max(stamp, Ordering::SeqCst);
            }
        }
    }

    /// Hit and miss counters
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            entries: self.entries.len(),
            hits,
            misses,
            hit_rate: if hits + misses > 0 {
                hits as f64 / (hits + misses) as f64
            } else {
                0.0
            },
        }
    }
}
