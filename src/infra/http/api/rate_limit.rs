use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RateLimitSettings;

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Time until the oldest request in the window stops counting.
    pub reset_after: Duration,
}

impl RateDecision {
    /// `reset_after` rounded up to whole seconds, never below one.
    pub fn reset_secs(&self) -> u64 {
        let millis = self.reset_after.as_millis() as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// Sliding-log limiter: each client may make `max_requests` within any
/// trailing `window`.
#[derive(Debug, Clone)]
pub struct ApiRateLimiter {
    window: Duration,
    max_requests: u32,
    buckets: Arc<DashMap<String, Vec<Instant>>>,
}

impl ApiRateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            buckets: Arc::new(DashMap::new()),
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(
            Duration::from_secs(u64::from(settings.window_seconds.get())),
            settings.max_requests.get(),
        )
    }

    pub fn allow(&self, client: &str) -> RateDecision {
        self.allow_at(client, Instant::now())
    }

    fn allow_at(&self, client: &str, now: Instant) -> RateDecision {
        let window = self.window;
        let mut entry = self.buckets.entry(client.to_string()).or_default();
        entry.retain(|instant| now.saturating_duration_since(*instant) < window);

        let remaining = self.max_requests.saturating_sub(entry.len() as u32);
        if remaining == 0 {
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_after: reset_after(&entry, now, window),
            };
        }

        entry.push(now);
        RateDecision {
            allowed: true,
            remaining: remaining - 1,
            reset_after: reset_after(&entry, now, window),
        }
    }

    /// Drop clients with no request inside the window.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let window = self.window;
        let before = self.buckets.len();
        self.buckets.retain(|_, log| {
            log.retain(|instant| now.saturating_duration_since(*instant) < window);
            !log.is_empty()
        });
        before.saturating_sub(self.buckets.len())
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn limit(&self) -> u32 {
        self.max_requests
    }
}

fn reset_after(log: &[Instant], now: Instant, window: Duration) -> Duration {
    log.first()
        .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
        .unwrap_or(window)
}
