//! In-memory result cache for rendered artifacts.
//!
//! Entries are whole byte buffers keyed by [`ArtifactKey`]. Expiry is lazy: an
//! expired entry is dropped the first time a read observes it, and a periodic
//! sweep reclaims entries nobody asks for again. Capacity is bounded with LRU
//! eviction on insert.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{domain::key::ArtifactKey, util::lock::mutex_lock};

use super::config::CacheConfig;

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_CACHE_HIT_TOTAL: &str = "tikzrender_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS_TOTAL: &str = "tikzrender_cache_miss_total";
pub(crate) const METRIC_CACHE_EVICT_TOTAL: &str = "tikzrender_cache_evict_total";
pub(crate) const METRIC_CACHE_EXPIRED_TOTAL: &str = "tikzrender_cache_expired_total";

#[derive(Clone)]
struct CacheEntry {
    value: Bytes,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= self.ttl
    }
}

/// Point-in-time counters exposed on the health surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub keys: usize,
    pub capacity: usize,
    pub ttl_seconds: u64,
}

pub struct ResultCache {
    config: CacheConfig,
    entries: Mutex<LruCache<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        let entries = Mutex::new(LruCache::new(config.capacity_non_zero()));
        Self {
            config,
            entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn get(&self, key: &ArtifactKey) -> Option<Bytes> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &ArtifactKey, now: Instant) -> Option<Bytes> {
        let found = {
            let mut entries = mutex_lock(&self.entries, SOURCE, "get");
            match entries.peek(key.as_str()).map(|entry| entry.is_expired(now)) {
                Some(true) => {
                    entries.pop(key.as_str());
                    counter!(METRIC_CACHE_EXPIRED_TOTAL).increment(1);
                    None
                }
                Some(false) => entries.get(key.as_str()).map(|entry| entry.value.clone()),
                None => None,
            }
        };

        match found {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                counter!(METRIC_CACHE_MISS_TOTAL).increment(1);
                None
            }
        }
    }

    /// Store a value, replacing any previous entry for the key wholesale.
    pub fn set(&self, key: &ArtifactKey, value: Bytes) {
        let entry = CacheEntry {
            value,
            inserted_at: Instant::now(),
            ttl: self.config.ttl,
        };

        let evicted =
            mutex_lock(&self.entries, SOURCE, "set").push(key.as_str().to_string(), entry);
        if let Some((evicted_key, _)) =
            evicted.filter(|(evicted_key, _)| evicted_key != key.as_str())
        {
            counter!(METRIC_CACHE_EVICT_TOTAL).increment(1);
            debug!(
                target = "tikzrender::cache",
                evicted_key = %evicted_key,
                "Evicted least recently used entry"
            );
        }
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = mutex_lock(&self.entries, SOURCE, "sweep");
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        if !expired.is_empty() {
            counter!(METRIC_CACHE_EXPIRED_TOTAL).increment(expired.len() as u64);
        }
        expired.len()
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            keys: self.len(),
            capacity: self.config.capacity,
            ttl_seconds: self.config.ttl.as_secs(),
        }
    }

    /// Spawn the periodic sweep. The caller owns the handle and aborts it on
    /// shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // Skip the first immediate tick
            loop {
                interval.tick().await;
                let removed = cache.sweep();
                if removed > 0 {
                    info!(
                        target = "tikzrender::cache",
                        op = "cache::sweep",
                        removed,
                        remaining = cache.len(),
                        "Swept expired cache entries"
                    );
                }
            }
        })
    }
}
