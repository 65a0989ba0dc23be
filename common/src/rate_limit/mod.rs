use std::{
    collections::HashMap,
    ops::Deref,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crate::args::RateLimiterArgs;

pub mod middleware;

#[derive(Clone, Copy, Debug)]
pub struct RateLimiterConfig {
    /// Requests allowed per identity within the window.
    pub capacity: u32,
    /// Window the bucket refills over.
    pub window: Duration,
}

impl From<RateLimiterArgs> for RateLimiterConfig {
    fn from(args: RateLimiterArgs) -> Self {
        Self {
            capacity: args.capacity,
            window: Duration::from_secs(args.window_secs),
        }
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            window: Duration::from_secs(60),
        }
    }
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self, config: &RateLimiterConfig) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let refill_rate = config.capacity as f64 / config.window.as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(config.capacity as f64);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct RateLimiterInner {
    config: RateLimiterConfig,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

/// Per-identity token bucket rate limiter. Keyed by caller identity
/// rather than source IP, since the intent layer sits behind a trusted
/// proxy that has already authenticated the caller.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

impl Deref for RateLimiter {
    type Target = RateLimiterInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            inner: Arc::new(RateLimiterInner {
                config,
                buckets: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RateLimiterConfig::default())
    }

    /// Returns true if `key` still has capacity this tick.
    pub fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.config.capacity));
        bucket.try_take(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_capacity_then_denies() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            capacity: 3,
            window: Duration::from_secs(60),
        });
        assert!(limiter.check("alice"));
        assert!(limiter.check("alice"));
        assert!(limiter.check("alice"));
        assert!(!limiter.check("alice"));
    }

    #[test]
    fn buckets_are_independent_per_key() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            capacity: 1,
            window: Duration::from_secs(60),
        });
        assert!(limiter.check("alice"));
        assert!(limiter.check("bob"));
        assert!(!limiter.check("alice"));
    }
}
