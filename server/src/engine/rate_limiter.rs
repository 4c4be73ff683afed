use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Token-bucket rate limiter keyed by string (participant uid, client IP).
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    max_tokens: u32,
    refill_rate: f64, // tokens per second
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a rate limiter.
    /// - `max_tokens`: burst capacity
    /// - `per_seconds`: refill one token every N seconds
    pub fn new(max_tokens: u32, per_seconds: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            max_tokens,
            refill_rate: 1.0 / per_seconds,
        }
    }

    /// Take a token for `key` if one is available.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    /// Same as [`check`](Self::check) against an explicit clock reading.
    pub fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let max = f64::from(self.max_tokens);

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: max,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(max);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Forget keys that have been quiet for longer than `older_than`.
    pub fn cleanup(&self, older_than: Duration) {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let Some(cutoff) = Instant::now().checked_sub(older_than) else {
            return;
        };
        buckets.retain(|_, b| b.last_refill > cutoff);
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_burst_then_denies() {
        let limiter = RateLimiter::new(5, 1.0);
        let now = Instant::now();
        for _ in 0..5 {
            assert!(limiter.check_at("guest-1", now));
        }
        assert!(!limiter.check_at("guest-1", now));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1, 1.0);
        let now = Instant::now();
        assert!(limiter.check_at("10.0.0.1", now));
        assert!(!limiter.check_at("10.0.0.1", now));
        assert!(limiter.check_at("10.0.0.2", now));
    }

    #[test]
    fn test_refills_with_time() {
        let limiter = RateLimiter::new(2, 1.0);
        let start = Instant::now();
        assert!(limiter.check_at("u", start));
        assert!(limiter.check_at("u", start));
        assert!(!limiter.check_at("u", start));
        assert!(limiter.check_at("u", start + Duration::from_secs(1)));
        assert!(!limiter.check_at("u", start + Duration::from_secs(1)));
    }

    #[test]
    fn test_refill_is_capped() {
        let limiter = RateLimiter::new(3, 1.0);
        let start = Instant::now();
        assert!(limiter.check_at("u", start));
        let later = start + Duration::from_secs(100);
        let granted = (0..10).filter(|_| limiter.check_at("u", later)).count();
        assert_eq!(granted, 3);
    }

    #[test]
    fn test_slow_refill_rate() {
        // one token every 15 seconds
        let limiter = RateLimiter::new(1, 15.0);
        let start = Instant::now();
        assert!(limiter.check_at("u", start));
        assert!(!limiter.check_at("u", start + Duration::from_secs(10)));
        assert!(limiter.check_at("u", start + Duration::from_secs(16)));
    }

    #[test]
    fn test_cleanup() {
        let limiter = RateLimiter::new(5, 1.0);
        limiter.check("recent");
        limiter.cleanup(Duration::from_secs(60));
        assert_eq!(limiter.tracked_keys(), 1);
        limiter.cleanup(Duration::ZERO);
        assert_eq!(limiter.tracked_keys(), 0);
    }
}
