//! Per-service token buckets and daily quotas.
//!
//! The bucket blocks cooperatively (short sleeps, deadline-bounded)
//! rather than spinning; the quota counter resets at UTC midnight and
//! must be consulted *before* a call so an exhausted service is
//! skipped, not hammered.

use chrono::{DateTime, NaiveDate, Utc};
use cp_config::ServiceLimit;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Granularity of cooperative waiting.
const WAIT_SLICE: Duration = Duration::from_millis(25);

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

struct QuotaState {
    day: NaiveDate,
    used: u32,
}

/// Token bucket plus daily quota for one service.
pub struct ServiceLimiter {
    rate_per_sec: f64,
    burst: f64,
    daily_quota: Option<u32>,
    bucket: Mutex<BucketState>,
    quota: Mutex<QuotaState>,
}

impl ServiceLimiter {
    pub fn new(limit: ServiceLimit) -> Self {
        ServiceLimiter {
            rate_per_sec: limit.rate_per_sec.max(0.0),
            burst: f64::from(limit.burst),
            daily_quota: limit.daily_quota,
            bucket: Mutex::new(BucketState {
                tokens: f64::from(limit.burst),
                last_refill: Instant::now(),
            }),
            quota: Mutex::new(QuotaState {
                day: Utc::now().date_naive(),
                used: 0,
            }),
        }
    }

    /// Take `n` tokens if immediately available.
    pub fn try_acquire(&self, n: u32) -> bool {
        let mut bucket = self.bucket.lock().expect("bucket lock");
        self.refill(&mut bucket);
        let needed = f64::from(n);
        if bucket.tokens >= needed {
            bucket.tokens -= needed;
            true
        } else {
            false
        }
    }

    /// Block until `n` tokens are available or the deadline passes.
    pub fn acquire(&self, n: u32, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            if self.try_acquire(n) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            // A token bucket refills continuously; waiting one slice at
            // a time keeps the thread interruptible at shutdown.
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(WAIT_SLICE.min(remaining));
        }
    }

    fn refill(&self, bucket: &mut BucketState) {
        let elapsed = bucket.last_refill.elapsed().as_secs_f64();
        bucket.last_refill = Instant::now();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst);
    }

    /// Calls remaining against today's quota; `None` means unlimited.
    pub fn remaining_quota(&self, now: DateTime<Utc>) -> Option<u32> {
        let cap = self.daily_quota?;
        let mut quota = self.quota.lock().expect("quota lock");
        self.roll_day(&mut quota, now);
        Some(cap.saturating_sub(quota.used))
    }

    /// Record one call against today's quota.
    pub fn record_call(&self, now: DateTime<Utc>) {
        let mut quota = self.quota.lock().expect("quota lock");
        self.roll_day(&mut quota, now);
        quota.used = quota.used.saturating_add(1);
    }

    fn roll_day(&self, quota: &mut QuotaState, now: DateTime<Utc>) {
        let today = now.date_naive();
        if quota.day != today {
            quota.day = today;
            quota.used = 0;
        }
    }
}

/// All service limiters, keyed by service name.
pub struct RateLimiterSet {
    limiters: HashMap<String, ServiceLimiter>,
}

impl RateLimiterSet {
    /// Build from the configured per-service limits.
    pub fn new(limits: &HashMap<String, ServiceLimit>) -> Self {
        let limiters = limits
            .iter()
            .map(|(name, limit)| (name.clone(), ServiceLimiter::new(*limit)))
            .collect();
        RateLimiterSet { limiters }
    }

    /// The limiter for a service; unconfigured services are unlimited.
    pub fn get(&self, service: &str) -> Option<&ServiceLimiter> {
        self.limiters.get(service)
    }

    /// True when the service may be called right now: quota remains and
    /// a token arrives before `max_wait` elapses.
    pub fn admit(&self, service: &str, now: DateTime<Utc>, max_wait: Duration) -> Admission {
        let Some(limiter) = self.get(service) else {
            return Admission::Admitted;
        };
        if let Some(0) = limiter.remaining_quota(now) {
            return Admission::QuotaExhausted;
        }
        if !limiter.acquire(1, max_wait) {
            return Admission::DeadlineExceeded;
        }
        limiter.record_call(now);
        Admission::Admitted
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    QuotaExhausted,
    DeadlineExceeded,
}
