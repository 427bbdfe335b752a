//! Token bucket state for a single client.
//!
//! # Algorithm
//!
//! ```text
//! tokens = min(capacity, tokens + elapsed_secs * refill_rate)
//! if tokens >= 1 { tokens -= 1; allow } else { deny }
//! ```
//!
//! The refill happens on every check, whether or not the check succeeds,
//! and `last_refill` never moves backwards. Two concurrent checks that read
//! the clock in one order and take the lock in the other therefore cannot
//! credit the same interval twice.

use std::fmt;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

/// Error type for rate limit quota configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateLimitError {
    /// Burst capacity cannot be zero.
    ZeroCapacity,
    /// Refill rate must be a finite number greater than zero.
    InvalidRate(f64),
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroCapacity => write!(f, "burst capacity must be at least 1"),
            RateLimitError::InvalidRate(rate) => write!(
                f,
                "refill rate must be a positive finite number, got {rate}; \
                 leave the rate limit stage out of the chain to disable limiting"
            ),
        }
    }
}

impl std::error::Error for RateLimitError {}

/// Burst capacity and steady refill rate shared by every bucket in a registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    capacity: NonZeroU32,
    refill_rate_per_second: f64,
}

impl Quota {
    /// Create a quota allowing bursts of `capacity` requests, refilled at
    /// `refill_rate_per_second` tokens per second.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::ZeroCapacity`] for a zero capacity and
    /// [`RateLimitError::InvalidRate`] for a rate that is not a positive
    /// finite number.
    pub fn new(capacity: u32, refill_rate_per_second: f64) -> Result<Self, RateLimitError> {
        let capacity = NonZeroU32::new(capacity).ok_or(RateLimitError::ZeroCapacity)?;
        if !refill_rate_per_second.is_finite() || refill_rate_per_second <= 0.0 {
            return Err(RateLimitError::InvalidRate(refill_rate_per_second));
        }
        Ok(Self {
            capacity,
            refill_rate_per_second,
        })
    }

    /// Maximum burst size.
    pub fn capacity(&self) -> u32 {
        self.capacity.get()
    }

    /// Steady-state tokens added per second.
    pub fn refill_rate_per_second(&self) -> f64 {
        self.refill_rate_per_second
    }
}

/// Outcome of a single rate limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    /// The request may proceed; `remaining` whole tokens are left.
    Allowed { remaining: u32 },
    /// The request is rejected; one token will be available after `retry_after`.
    Denied { retry_after: Duration },
}

impl RateDecision {
    /// Whether the request may proceed.
    #[inline]
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Rate limit state for one client.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    quota: Quota,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A bucket holding its full capacity as of `now`.
    pub fn full(quota: Quota, now: Instant) -> Self {
        Self {
            quota,
            tokens: f64::from(quota.capacity()),
            last_refill: now,
        }
    }

    /// Refill for the time elapsed since the last check, then try to take one token.
    pub fn try_acquire(&mut self, now: Instant) -> RateDecision {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            RateDecision::Allowed {
                // tokens is within [0, capacity] so the cast cannot truncate
                remaining: self.tokens.floor() as u32,
            }
        } else {
            RateDecision::Denied {
                retry_after: self.time_until_next_token(),
            }
        }
    }

    /// Tokens currently available (fractional).
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// When this bucket was last recomputed.
    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }

    fn refill(&mut self, now: Instant) {
        if now <= self.last_refill {
            return;
        }
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let capacity = f64::from(self.quota.capacity());
        self.tokens = elapsed
            .mul_add(self.quota.refill_rate_per_second(), self.tokens)
            .min(capacity);
        self.last_refill = now;
    }

    fn time_until_next_token(&self) -> Duration {
        let deficit = (1.0 - self.tokens).max(0.0);
        Duration::try_from_secs_f64(deficit / self.quota.refill_rate_per_second())
            .unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn quota(capacity: u32, rate: f64) -> Quota {
        Quota::new(capacity, rate).unwrap()
    }

    #[test]
    fn test_quota_rejects_zero_capacity() {
        assert_eq!(Quota::new(0, 5.0), Err(RateLimitError::ZeroCapacity));
    }

    #[test]
    fn test_quota_rejects_bad_rates() {
        assert!(matches!(
            Quota::new(10, 0.0),
            Err(RateLimitError::InvalidRate(_))
        ));
        assert!(matches!(
            Quota::new(10, -1.0),
            Err(RateLimitError::InvalidRate(_))
        ));
        assert!(matches!(
            Quota::new(10, f64::NAN),
            Err(RateLimitError::InvalidRate(_))
        ));
        assert!(matches!(
            Quota::new(10, f64::INFINITY),
            Err(RateLimitError::InvalidRate(_))
        ));
    }

    #[test]
    fn test_new_bucket_is_full() {
        let bucket = TokenBucket::full(quota(10, 5.0), Instant::now());
        assert_eq!(bucket.tokens(), 10.0);
    }

    #[test]
    fn test_burst_then_deny() {
        let now = Instant::now();
        let mut bucket = TokenBucket::full(quota(3, 1.0), now);

        assert_eq!(
            bucket.try_acquire(now),
            RateDecision::Allowed { remaining: 2 }
        );
        assert_eq!(
            bucket.try_acquire(now),
            RateDecision::Allowed { remaining: 1 }
        );
        assert_eq!(
            bucket.try_acquire(now),
            RateDecision::Allowed { remaining: 0 }
        );
        assert!(!bucket.try_acquire(now).is_allowed());
    }

    #[test]
    fn test_denial_does_not_consume() {
        let now = Instant::now();
        let mut bucket = TokenBucket::full(quota(1, 1.0), now);
        assert!(bucket.try_acquire(now).is_allowed());

        for _ in 0..5 {
            assert!(!bucket.try_acquire(now).is_allowed());
        }
        assert_eq!(bucket.tokens(), 0.0);
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let now = Instant::now();
        let mut bucket = TokenBucket::full(quota(4, 2.0), now);
        bucket.try_acquire(now);

        let later = now + Duration::from_secs(3600);
        assert_eq!(
            bucket.try_acquire(later),
            RateDecision::Allowed { remaining: 3 }
        );
        assert!(bucket.tokens() <= 4.0);
    }

    #[test]
    fn test_partial_refill() {
        let now = Instant::now();
        let mut bucket = TokenBucket::full(quota(1, 2.0), now);
        assert!(bucket.try_acquire(now).is_allowed());

        // 250ms at 2 tokens/s is half a token: still denied
        let quarter = now + Duration::from_millis(250);
        assert!(!bucket.try_acquire(quarter).is_allowed());

        // another 250ms completes the token
        let half = now + Duration::from_millis(500);
        assert!(bucket.try_acquire(half).is_allowed());
    }

    #[test]
    fn test_retry_after_reflects_deficit() {
        let now = Instant::now();
        let mut bucket = TokenBucket::full(quota(1, 4.0), now);
        bucket.try_acquire(now);

        match bucket.try_acquire(now) {
            RateDecision::Denied { retry_after } => {
                assert_eq!(retry_after, Duration::from_millis(250));
            }
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn test_last_refill_never_moves_backwards() {
        let now = Instant::now();
        let later = now + Duration::from_secs(1);
        let mut bucket = TokenBucket::full(quota(2, 1.0), now);

        bucket.try_acquire(later);
        bucket.try_acquire(now);

        assert_eq!(bucket.last_refill(), later);
    }
}
