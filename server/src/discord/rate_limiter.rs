use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Token-bucket limiter keyed by route bucket (a guild or channel id).
/// Paces outbound REST calls so a long scan does not trip Discord's limits.
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
            max_tokens: max_tokens.max(1),
            refill_rate: 1.0 / per_seconds,
        }
    }

    /// Take a token for `key` if one is available. Otherwise returns how long
    /// to wait before the next token refills.
    pub fn try_acquire(&self, key: &str) -> Result<(), Duration> {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.max_tokens as f64,
            last_refill: now,
        });

        // Refill tokens based on elapsed time
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.max_tokens as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_rate))
        }
    }

    /// Wait until a token for `key` is available and take it.
    pub async fn acquire(&self, key: &str) {
        while let Err(wait) = self.try_acquire(key) {
            tokio::time::sleep(wait).await;
        }
    }

    /// Empty the bucket for `key` so the next caller waits a full refill.
    /// Used after the server answered 429 for that bucket.
    pub fn drain(&self, key: &str) {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bucket) = buckets.get_mut(key) {
            bucket.tokens = 0.0;
            bucket.last_refill = Instant::now();
        }
    }
}
