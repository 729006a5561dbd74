//! Admission algorithms backed by the shared counter store.

mod backend;
mod bucket;
mod clock;
mod window;

pub use backend::{Admission, Decision, RateLimitHeaders, RateLimiterBackend};
pub use bucket::{FixedBucketLimiter, Replenisher};
pub use clock::{Clock, ManualClock, SystemClock};
pub use window::{minute_floor, SlidingWindowLimiter};
