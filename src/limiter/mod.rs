//! Per-client token bucket rate limiting.
//!
//! ```text
//!   check("10.0.0.5")
//!         │
//!         ▼
//! ┌────────────────────┐   miss   ┌──────────────────────┐
//! │ RateLimiterRegistry│ ───────► │ create full bucket   │
//! │ (DashMap shards)   │          │ (first writer wins)  │
//! └─────────┬──────────┘          └──────────┬───────────┘
//!           │ hit                            │
//!           ▼                                ▼
//!   refill + take one token         EvictionPolicy::after_insert
//!           │
//!           ▼
//!   RateDecision::{Allowed, Denied}
//! ```
//!
//! The HTTP stage lives in [`crate::middleware::rate_limit`]; this module has
//! no knowledge of requests.

mod bucket;
mod clock;
mod eviction;
mod registry;

pub use bucket::{Quota, RateDecision, RateLimitError, TokenBucket};
pub use clock::{Clock, ManualClock, SystemClock};
pub use eviction::{BucketMap, EvictionPolicy, IdleTimeout, LeastRecentlyUsed, Unbounded};
pub use registry::RateLimiterRegistry;
