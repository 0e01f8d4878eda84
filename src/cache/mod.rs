//! Result cache for rendered diagrams and generated descriptions.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! ttl_seconds = 3600
//! sweep_interval_seconds = 600
//! capacity = 1024
//! ```

mod config;
mod store;

pub use config::CacheConfig;
pub use store::{CacheStats, ResultCache};

pub(crate) use store::{
    METRIC_CACHE_EVICT_TOTAL, METRIC_CACHE_EXPIRED_TOTAL, METRIC_CACHE_HIT_TOTAL,
    METRIC_CACHE_MISS_TOTAL,
};
