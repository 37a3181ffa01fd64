use std::collections::HashMap;
use std::sync::Arc;

use jobhive_core::RateLimitConfig;
use jobhive_schema::UserId;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: &RateLimitConfig) -> Self {
        Self {
            tokens: config.burst as f64,
            max_tokens: config.burst as f64,
            refill_rate: config.requests_per_minute as f64 / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = (now - self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn is_full(&self, now: Instant) -> bool {
        let elapsed = (now - self.last_refill).as_secs_f64();
        self.tokens + elapsed * self.refill_rate >= self.max_tokens
    }
}

/// Per-user token bucket in front of the orchestrator.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<UserId, TokenBucket>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    pub async fn check(&self, user_id: &UserId) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(user_id.clone())
            .or_insert_with(|| TokenBucket::new(&self.config));
        bucket.try_consume()
    }

    /// Forget users whose bucket has refilled completely.
    pub async fn prune(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| !bucket.is_full(now));
        before - buckets.len()
    }
}
