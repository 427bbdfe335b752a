//! Per-client token bucket registry.
//!
//! # Concurrency
//!
//! Buckets live in a [`DashMap`], which splits the key space into shards,
//! each behind its own lock. A check holds the shard's write lock for the
//! whole refill-then-consume sequence, so:
//!
//! - two checks for the same client are serialized (no lost updates, no
//!   double spends)
//! - checks for clients on different shards run in parallel
//! - creating a bucket goes through the entry API, so concurrent first
//!   requests from one client end up sharing a single bucket

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tracing::{debug, trace};

use super::bucket::{Quota, RateDecision, TokenBucket};
use super::clock::{Clock, SystemClock};
use super::eviction::{BucketMap, EvictionPolicy, Unbounded};

/// Concurrency-safe map from client identity to its token bucket.
pub struct RateLimiterRegistry {
    buckets: BucketMap,
    quota: Quota,
    clock: Arc<dyn Clock>,
    eviction: Arc<dyn EvictionPolicy>,
}

impl RateLimiterRegistry {
    /// Create a registry using the system clock and no eviction.
    pub fn new(quota: Quota) -> Self {
        Self {
            buckets: BucketMap::new(),
            quota,
            clock: Arc::new(SystemClock),
            eviction: Arc::new(Unbounded),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the eviction policy.
    pub fn with_eviction(mut self, eviction: Arc<dyn EvictionPolicy>) -> Self {
        self.eviction = eviction;
        self
    }

    /// Check and consume one token for `client_id`.
    pub fn check(&self, client_id: &str) -> RateDecision {
        let now = self.clock.now();

        // Fast path for known clients, no key allocation.
        if let Some(mut bucket) = self.buckets.get_mut(client_id) {
            return bucket.try_acquire(now);
        }

        let decision = match self.buckets.entry(client_id.to_owned()) {
            Entry::Occupied(mut existing) => return existing.get_mut().try_acquire(now),
            Entry::Vacant(vacant) => {
                let mut bucket = TokenBucket::full(self.quota, now);
                let decision = bucket.try_acquire(now);
                vacant.insert(bucket);
                decision
            }
        };

        trace!(client_id, "Created rate limit bucket");
        let evicted = self.eviction.after_insert(&self.buckets, now);
        if evicted > 0 {
            debug!(evicted, tracked = self.buckets.len(), "Evicted rate limit buckets");
        }

        decision
    }

    /// Whether a request from `client_id` is allowed right now.
    #[inline]
    pub fn allow(&self, client_id: &str) -> bool {
        self.check(client_id).is_allowed()
    }

    /// Run the eviction policy's periodic sweep, returning the number of evicted buckets.
    pub fn sweep(&self) -> usize {
        self.eviction.sweep(&self.buckets, self.clock.now())
    }

    /// Number of clients currently tracked.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// The quota applied to every bucket.
    pub fn quota(&self) -> Quota {
        self.quota
    }

    /// Tokens currently held by `client_id`, if it is tracked.
    pub fn tokens(&self, client_id: &str) -> Option<f64> {
        self.buckets.get(client_id).map(|bucket| bucket.tokens())
    }
}

impl fmt::Debug for RateLimiterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiterRegistry")
            .field("quota", &self.quota)
            .field("tracked", &self.buckets.len())
            .field("eviction", &self.eviction)
            .finish_non_exhaustive()
    }
}
