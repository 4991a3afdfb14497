//! Exponential backoff with jitter.
//!
//! [`Backoff`] is the delay curve. [`RetryPolicy`] adds an attempt limit:
//! the HTTP client stops at the limit, the event subscription keeps
//! reconnecting past it and only escalates its log level.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::time::Duration;

/// Delay curve: `initial * factor^(attempt - 1)`, capped at `max`, then
/// spread by `± jitter` of itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub factor: u32,
    /// Fraction in `[0, 1]`; 0 disables jitter.
    pub jitter: f64,
}

impl Backoff {
    /// Stream reconnects: 500 ms doubling up to one minute, ±20 %.
    pub fn reconnect() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(60),
            factor: 2,
            jitter: 0.2,
        }
    }

    /// HTTP request retries: 100 ms doubling up to 5 s, ±10 %.
    pub fn request() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
            factor: 2,
            jitter: 0.1,
        }
    }

    /// Delay before retry number `attempt` (1-based; 0 is treated as 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        let steps = attempt.saturating_sub(1);
        let growth = self.factor.max(1).saturating_pow(steps);
        let base = self.initial.saturating_mul(growth).min(self.max);

        let spread = self.jitter.clamp(0.0, 1.0);
        if spread == 0.0 {
            return base;
        }
        base.mul_f64(1.0 + spread * (2.0 * unit_random() - 1.0))
    }
}

/// A [`Backoff`] with an attempt limit.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    backoff: Backoff,
    limit: u32,
}

impl RetryPolicy {
    pub fn new(backoff: Backoff, limit: u32) -> Self {
        Self { backoff, limit }
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// `true` while `attempt` failures are still within the limit.
    pub fn within_limit(&self, attempt: u32) -> bool {
        attempt <= self.limit
    }

    /// Delay before retry `attempt`, or `None` once the limit is used up.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        self.within_limit(attempt)
            .then(|| self.backoff.delay(attempt))
    }
}

impl Default for RetryPolicy {
    /// Three retries on the request curve.
    fn default() -> Self {
        Self::new(Backoff::request(), 3)
    }
}

/// Uniform-ish value in `[0, 1)` from a randomly keyed std hasher.
fn unit_random() -> f64 {
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(0x9e37_79b9_7f4a_7c15);
    (hasher.finish() >> 11) as f64 / (1u64 << 53) as f64
}
