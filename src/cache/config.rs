//! Result cache configuration.

use std::{num::NonZeroUsize, time::Duration};

const DEFAULT_TTL_SECS: u64 = 3600;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 600;
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Time after which an entry is no longer observable.
    pub ttl: Duration,
    /// Cadence of the background sweep that reclaims expired entries.
    pub sweep_interval: Duration,
    /// Maximum number of entries before least-recently-used eviction.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            ttl: settings.ttl,
            sweep_interval: settings.sweep_interval,
            capacity: settings.capacity.get(),
        }
    }
}

impl CacheConfig {
    /// Returns the capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
