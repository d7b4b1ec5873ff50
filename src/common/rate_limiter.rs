//! Token bucket rate limiter
//!
//! Keeps broker API usage inside the exchange's request budget. Callers are
//! worker threads, so acquisition blocks the calling thread rather than an
//! async task.

use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for the rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum requests allowed per refill interval
    pub max_requests_per_second: usize,
    /// Refill interval for tokens
    pub refill_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests_per_second: 10,
            refill_interval: Duration::from_secs(1),
        }
    }
}

impl RateLimiterConfig {
    pub fn with_rate(mut self, requests_per_second: usize) -> Self {
        self.max_requests_per_second = requests_per_second;
        self
    }

    pub fn with_refill_interval(mut self, interval: Duration) -> Self {
        self.refill_interval = interval;
        self
    }
}

struct Bucket {
    tokens: usize,
    last_refill: Instant,
}

/// Blocking token bucket
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    max_tokens: usize,
    refill_interval: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: config.max_requests_per_second,
                last_refill: Instant::now(),
            }),
            max_tokens: config.max_requests_per_second,
            refill_interval: config.refill_interval,
        }
    }

    pub fn with_rate(requests_per_second: usize) -> Self {
        Self::new(RateLimiterConfig::default().with_rate(requests_per_second))
    }

    /// Take one token, sleeping until the bucket refills if necessary
    pub fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            thread::sleep(self.refill_interval / self.max_tokens.max(1) as u32);
        }
    }

    /// Take one token without blocking; returns whether one was available
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().unwrap();
        if bucket.last_refill.elapsed() >= self.refill_interval {
            bucket.tokens = self.max_tokens;
            bucket.last_refill = Instant::now();
        }
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    pub fn available(&self) -> usize {
        self.bucket.lock().unwrap().tokens
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_tokens_match_rate() {
        let limiter = RateLimiter::with_rate(5);
        assert_eq!(limiter.available(), 5);
        assert_eq!(limiter.max_tokens(), 5);
    }

    #[test]
    fn test_try_acquire_drains_bucket() {
        let config = RateLimiterConfig::default()
            .with_rate(2)
            .with_refill_interval(Duration::from_secs(60));
        let limiter = RateLimiter::new(config);

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.available(), 0);
    }

    #[test]
    fn test_refill_after_interval() {
        let config = RateLimiterConfig::default()
            .with_rate(2)
            .with_refill_interval(Duration::from_millis(30));
        let limiter = RateLimiter::new(config);

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        thread::sleep(Duration::from_millis(40));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_acquire_blocks_until_refill() {
        let config = RateLimiterConfig::default()
            .with_rate(1)
            .with_refill_interval(Duration::from_millis(20));
        let limiter = RateLimiter::new(config);

        limiter.acquire();
        let start = Instant::now();
        limiter.acquire();
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
