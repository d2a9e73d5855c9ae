//! Single-use, time-bounded correlation cache.
//!
//! Maps an opaque request id to the state of a ceremony between its start and
//! finish calls. Entries expire a fixed TTL after they were written and are
//! removed by [`CorrelationCache::take`], so a request id can finish at most
//! once. Missing, expired and consumed ids all look the same to callers.
//!
//! The map is split into shards, each behind its own async mutex. Because the
//! TTL is fixed, write order is also expiry order: the per-shard write index
//! doubles as the eviction queue when a shard reaches capacity.

use std::{
    collections::{hash_map::RandomState, BTreeMap, HashMap},
    hash::BuildHasher,
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::debug;

const DEFAULT_SHARDS: usize = 16;

struct Entry<V> {
    value: V,
    expires_at: Instant,
    sequence: u64,
}

struct Shard<V> {
    entries: HashMap<String, Entry<V>>,
    // write sequence -> key, oldest first
    order: BTreeMap<u64, String>,
    next_sequence: u64,
}

impl<V> Shard<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_sequence: 0,
        }
    }

    fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.sequence);
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let mut purged = 0;
        while let Some((_, key)) = self.order.first_key_value() {
            let expired = self
                .entries
                .get(key)
                .map_or(true, |entry| entry.expires_at <= now);
            if !expired {
                break;
            }
            if let Some((_, key)) = self.order.pop_first() {
                self.entries.remove(&key);
                purged += 1;
            }
        }
        purged
    }

    fn evict_oldest(&mut self) {
        if let Some((_, key)) = self.order.pop_first() {
            self.entries.remove(&key);
        }
    }
}

pub struct CorrelationCache<V> {
    shards: Box<[Mutex<Shard<V>>]>,
    hasher: RandomState,
    ttl: Duration,
    shard_capacity: usize,
}

impl<V> CorrelationCache<V> {
    /// Build a cache holding at most `max_entries` entries for `ttl` each.
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self::with_shards(ttl, max_entries, DEFAULT_SHARDS)
    }

    #[must_use]
    pub fn with_shards(ttl: Duration, max_entries: usize, shards: usize) -> Self {
        let shards = shards.clamp(1, max_entries.max(1));
        let shard_capacity = max_entries.max(1).div_ceil(shards);
        Self {
            shards: (0..shards).map(|_| Mutex::new(Shard::new())).collect(),
            hasher: RandomState::new(),
            ttl,
            shard_capacity,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn shard(&self, key: &str) -> &Mutex<Shard<V>> {
        let index = usize::try_from(self.hasher.hash_one(key) % self.shards.len() as u64)
            .unwrap_or_default();
        &self.shards[index]
    }

    /// Store `value` under `key`, replacing any previous entry for that key.
    pub async fn put(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let now = Instant::now();
        let mut shard = self.shard(&key).lock().await;

        shard.remove(&key);
        if shard.entries.len() >= self.shard_capacity {
            shard.purge_expired(now);
        }
        while shard.entries.len() >= self.shard_capacity {
            shard.evict_oldest();
        }

        let sequence = shard.next_sequence;
        shard.next_sequence += 1;
        shard.order.insert(sequence, key.clone());
        shard.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
                sequence,
            },
        );
    }

    /// Remove and return the live entry for `key`.
    ///
    /// Retrieval and removal happen under one lock, so of several concurrent
    /// callers with the same key at most one gets `Some`.
    pub async fn take(&self, key: &str) -> Option<V> {
        let mut shard = self.shard(key).lock().await;
        let entry = shard.remove(key)?;
        (entry.expires_at > Instant::now()).then_some(entry.value)
    }

    /// Drop every expired entry, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        for shard in self.shards.iter() {
            purged += shard.lock().await.purge_expired(now);
        }
        purged
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let mut live = 0;
        for shard in self.shards.iter() {
            live += shard
                .lock()
                .await
                .entries
                .values()
                .filter(|entry| entry.expires_at > now)
                .count();
        }
        live
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<V: Clone> CorrelationCache<V> {
    /// Read the live entry for `key` without consuming it.
    pub async fn peek(&self, key: &str) -> Option<V> {
        let shard = self.shard(key).lock().await;
        shard
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }
}

/// Purge `cache` every `every` until the returned task is aborted.
pub fn spawn_purger<V>(cache: Arc<CorrelationCache<V>>, every: Duration) -> JoinHandle<()>
where
    V: Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = cache.purge_expired().await;
            if purged > 0 {
                debug!(purged, "expired ceremonies purged");
            }
        }
    })
}
