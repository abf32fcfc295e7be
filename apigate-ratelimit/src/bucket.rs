use apigate_core::clock::Clock;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Outcome of an `acquire` call (§4.3).
#[derive(Debug, Clone, PartialEq)]
pub struct AcquireResult {
    pub admitted: bool,
    pub retry_after_ms: u64,
}

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill_millis: i64,
}

impl Bucket {
    fn new(capacity: f64, burst: f64, refill_per_sec: f64, now_millis: i64) -> Self {
        Self {
            tokens: capacity + burst,
            capacity: capacity + burst,
            refill_per_sec,
            last_refill_millis: now_millis,
        }
    }

    fn refill(&mut self, now_millis: i64) {
        let elapsed_secs = (now_millis - self.last_refill_millis).max(0) as f64 / 1000.0;
        if elapsed_secs > 0.0 {
            self.tokens = (self.tokens + elapsed_secs * self.refill_per_sec).min(self.capacity);
            self.last_refill_millis = now_millis;
        }
    }

    fn acquire(&mut self, cost: f64, now_millis: i64) -> AcquireResult {
        self.refill(now_millis);
        if self.tokens >= cost {
            self.tokens -= cost;
            AcquireResult {
                admitted: true,
                retry_after_ms: 0,
            }
        } else {
            let deficit = cost - self.tokens;
            let retry_after_ms = if self.refill_per_sec > 0.0 {
                ((deficit / self.refill_per_sec) * 1000.0).ceil() as u64
            } else {
                u64::MAX
            };
            AcquireResult {
                admitted: false,
                retry_after_ms,
            }
        }
    }

    fn idle_for(&self, now_millis: i64) -> Duration {
        Duration::from_millis((now_millis - self.last_refill_millis).max(0) as u64)
    }
}

/// Single-process token bucket keyed by (principal id, route-class), sharded
/// by `DashMap` the way the teacher's rate-limiting plugin shards its
/// sliding-window counters. Unlike the teacher's sliding window, refill is
/// continuous rather than reset-on-window-boundary (§4.3).
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    buckets: DashMap<String, Bucket>,
    idle_ttl: Duration,
}

fn bucket_key(principal_id: &str, route_class: &str) -> String {
    format!("{principal_id}:{route_class}")
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, idle_ttl: Duration) -> Self {
        Self {
            clock,
            buckets: DashMap::new(),
            idle_ttl,
        }
    }

    /// `capacity_per_minute` and `burst_tokens` come from the caller's plan
    /// and route config respectively; refill runs continuously at
    /// `capacity_per_minute / 60` tokens/sec.
    pub fn acquire(
        &self,
        principal_id: &str,
        route_class: &str,
        capacity_per_minute: u32,
        burst_tokens: u32,
        cost: f64,
    ) -> AcquireResult {
        let now_millis = self.clock.now().timestamp_millis();
        let key = bucket_key(principal_id, route_class);
        let mut entry = self.buckets.entry(key).or_insert_with(|| {
            Bucket::new(
                capacity_per_minute as f64,
                burst_tokens as f64,
                capacity_per_minute as f64 / 60.0,
                now_millis,
            )
        });
        entry.acquire(cost, now_millis)
    }

    /// Background sweep removing buckets idle beyond the configured TTL.
    pub fn sweep_idle(&self) {
        let now_millis = self.clock.now().timestamp_millis();
        let ttl = self.idle_ttl;
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.idle_for(now_millis) < ttl);
        let removed = before - self.buckets.len();
        if removed > 0 {
            debug!(removed, "swept idle rate limit buckets");
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigate_core::clock::FixedClock;
    use chrono::Utc;

    #[test]
    fn admits_up_to_capacity_then_denies() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let limiter = RateLimiter::new(clock, Duration::from_secs(600));
        // capacity_per_minute=2, burst=0: two requests admitted, third denied.
        assert!(limiter.acquire("p1", "default", 2, 0, 1.0).admitted);
        assert!(limiter.acquire("p1", "default", 2, 0, 1.0).admitted);
        let third = limiter.acquire("p1", "default", 2, 0, 1.0);
        assert!(!third.admitted);
        assert!(third.retry_after_ms > 0);
    }

    #[test]
    fn refill_is_continuous_over_elapsed_time() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        // capacity_per_minute=60 -> refill rate 1 token/sec, bucket starts full at 60.
        let limiter = RateLimiter::new(clock.clone(), Duration::from_secs(600));
        for _ in 0..60 {
            assert!(limiter.acquire("p1", "default", 60, 0, 1.0).admitted);
        }
        assert!(!limiter.acquire("p1", "default", 60, 0, 1.0).admitted);
        clock.advance(chrono::Duration::seconds(1));
        assert!(limiter.acquire("p1", "default", 60, 0, 1.0).admitted);
    }

    #[test]
    fn burst_tokens_allow_short_overshoot() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let limiter = RateLimiter::new(clock, Duration::from_secs(600));
        assert!(limiter.acquire("p1", "default", 1, 2, 1.0).admitted);
        assert!(limiter.acquire("p1", "default", 1, 2, 1.0).admitted);
        assert!(limiter.acquire("p1", "default", 1, 2, 1.0).admitted);
        assert!(!limiter.acquire("p1", "default", 1, 2, 1.0).admitted);
    }

    #[test]
    fn sweep_removes_only_idle_buckets() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let limiter = RateLimiter::new(clock.clone(), Duration::from_millis(50));
        limiter.acquire("p1", "default", 60, 0, 1.0);
        assert_eq!(limiter.bucket_count(), 1);
        clock.advance(chrono::Duration::milliseconds(100));
        limiter.sweep_idle();
        assert_eq!(limiter.bucket_count(), 0);
    }
}
