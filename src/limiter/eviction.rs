//! Eviction policies bounding the number of tracked clients.
//!
//! Without eviction every distinct client identity ever seen keeps a bucket
//! for the lifetime of the process. A policy is injected into the registry
//! at construction and is consulted in two places:
//!
//! - [`EvictionPolicy::after_insert`] right after a new client's bucket is
//!   created (no shard lock is held at that point)
//! - [`EvictionPolicy::sweep`] from the periodic background task
//!
//! Evicting a bucket that has been idle for at least `capacity / rate`
//! seconds is invisible to the client: it would have refilled to full
//! capacity anyway, and a new bucket starts full.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::bucket::TokenBucket;

/// Storage used by the registry: client identity to bucket.
pub type BucketMap = DashMap<String, TokenBucket>;

/// Strategy for dropping buckets from the registry.
///
/// Both hooks return the number of buckets removed.
pub trait EvictionPolicy: Send + Sync + fmt::Debug {
    /// Called after a bucket for a previously unseen client was inserted.
    fn after_insert(&self, _buckets: &BucketMap, _now: Instant) -> usize {
        0
    }

    /// Called periodically by the background sweep task.
    fn sweep(&self, _buckets: &BucketMap, _now: Instant) -> usize {
        0
    }
}

/// Never evict anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

impl EvictionPolicy for Unbounded {}

/// Drop buckets that have not been checked for longer than `ttl`.
#[derive(Debug, Clone, Copy)]
pub struct IdleTimeout {
    ttl: Duration,
}

impl IdleTimeout {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

impl EvictionPolicy for IdleTimeout {
    fn sweep(&self, buckets: &BucketMap, now: Instant) -> usize {
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_refill()) < self.ttl);
        before.saturating_sub(buckets.len())
    }
}

/// Keep at most `max_entries` buckets, dropping the least recently used first.
///
/// "Used" means checked: every check refreshes a bucket's `last_refill`.
/// Finding victims is a scan over the map. Once the cap is exceeded a whole
/// batch (a tenth of the cap) is dropped, so a scan happens at most once
/// per batch of new clients rather than once per new client. Only one
/// caller scans at a time; concurrent inserts skip eviction and may leave
/// the map briefly above the cap.
#[derive(Debug)]
pub struct LeastRecentlyUsed {
    max_entries: usize,
    batch: usize,
    evicting: AtomicBool,
}

impl LeastRecentlyUsed {
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            max_entries,
            batch: max_entries / 10,
            evicting: AtomicBool::new(false),
        }
    }

    /// Size the map is trimmed down to once it goes over the cap.
    pub fn low_water_mark(&self) -> usize {
        self.max_entries - self.batch
    }

    fn enforce(&self, buckets: &BucketMap) -> usize {
        if buckets.len() <= self.max_entries {
            return 0;
        }
        if self
            .evicting
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return 0;
        }

        let removed = self.evict_down_to(buckets, self.low_water_mark());
        self.evicting.store(false, Ordering::Release);
        removed
    }

    fn evict_down_to(&self, buckets: &BucketMap, target: usize) -> usize {
        let excess = buckets.len().saturating_sub(target);
        if excess == 0 {
            return 0;
        }

        let mut by_age: Vec<(Instant, String)> = buckets
            .iter()
            .map(|entry| (entry.value().last_refill(), entry.key().clone()))
            .collect();
        let excess = excess.min(by_age.len());
        if excess < by_age.len() {
            by_age.select_nth_unstable_by_key(excess, |(last_used, _)| *last_used);
        }

        by_age
            .into_iter()
            .take(excess)
            .filter(|(seen, key)| {
                // skip buckets that were touched after we looked at them
                buckets
                    .remove_if(key, |_, bucket| bucket.last_refill() <= *seen)
                    .is_some()
            })
            .count()
    }
}

impl EvictionPolicy for LeastRecentlyUsed {
    fn after_insert(&self, buckets: &BucketMap, _now: Instant) -> usize {
        self.enforce(buckets)
    }

    fn sweep(&self, buckets: &BucketMap, _now: Instant) -> usize {
        self.enforce(buckets)
    }
}

/// Apply two policies one after the other.
impl<A, B> EvictionPolicy for (A, B)
where
    A: EvictionPolicy,
    B: EvictionPolicy,
{
    fn after_insert(&self, buckets: &BucketMap, now: Instant) -> usize {
        self.0.after_insert(buckets, now) + self.1.after_insert(buckets, now)
    }

    fn sweep(&self, buckets: &BucketMap, now: Instant) -> usize {
        self.0.sweep(buckets, now) + self.1.sweep(buckets, now)
    }
}
