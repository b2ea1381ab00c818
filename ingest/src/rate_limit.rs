//! Per-secret token buckets. Only consulted when rate limit enforcement is
//! switched on.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

struct Bucket {
    tokens: f64,
    capacity: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Bucket {
            tokens: capacity,
            capacity,
            refilled_at: now,
        }
    }

    fn try_take(&mut self, capacity: f64, now: Instant) -> bool {
        // A changed plan takes effect on the next request
        if capacity != self.capacity {
            self.capacity = capacity;
            self.tokens = self.tokens.min(capacity);
        }

        let elapsed = now.duration_since(self.refilled_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.capacity / 60.0).min(self.capacity);
        self.refilled_at = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// A bucket left alone this long has refilled to capacity, so dropping it
/// changes nothing.
const IDLE_AFTER: Duration = Duration::from_secs(60);

struct Buckets {
    by_secret: HashMap<String, Bucket>,
    pruned_at: Instant,
}

impl Buckets {
    fn prune(&mut self, now: Instant) {
        if now.duration_since(self.pruned_at) < IDLE_AFTER {
            return;
        }
        self.by_secret
            .retain(|_, bucket| now.duration_since(bucket.refilled_at) < IDLE_AFTER);
        self.pruned_at = now;
    }
}

/// Allows `rate_per_minute` requests per secret in a burst, refilling at
/// `rate_per_minute / 60` per second.
pub struct RateLimiter {
    buckets: Mutex<Buckets>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        RateLimiter {
            buckets: Mutex::new(Buckets {
                by_secret: HashMap::new(),
                pruned_at: Instant::now(),
            }),
        }
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, secret_id: &str, rate_per_minute: u32) -> bool {
        let capacity = f64::from(rate_per_minute.max(1));
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        buckets.prune(now);

        match buckets.by_secret.get_mut(secret_id) {
            Some(bucket) => bucket.try_take(capacity, now),
            None => {
                let mut bucket = Bucket::new(capacity, now);
                let allowed = bucket.try_take(capacity, now);
                buckets.by_secret.insert(secret_id.to_string(), bucket);
                allowed
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().by_secret.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
