//! Sliding window counter over per-minute buckets.
//!
//! Request counts live in one hash keyed by the minute-truncated Unix time of
//! each bucket. A check increments the current bucket and sums every bucket
//! still inside the window; buckets that have fallen out are deleted as a side
//! effect of the same check.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::backend::{Admission, Decision, RateLimitHeaders, RateLimiterBackend};
use super::clock::Clock;
use crate::error::{Result, SluiceError};
use crate::store::CounterStore;

const SECS_PER_MINUTE: i64 = 60;

/// Truncate a Unix timestamp to the start of its minute.
pub fn minute_floor(unix_secs: i64) -> i64 {
    unix_secs.div_euclid(SECS_PER_MINUTE) * SECS_PER_MINUTE
}

/// Rate limiter admitting at most `limit` requests in the trailing window.
pub struct SlidingWindowLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    key: String,
    limit: i64,
    window_minutes: i64,
}

impl SlidingWindowLimiter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        key: impl Into<String>,
        limit: i64,
        window_minutes: i64,
    ) -> Self {
        Self {
            store,
            clock,
            key: key.into(),
            limit,
            window_minutes,
        }
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// Oldest bucket timestamp still counted when the current bucket is
    /// `bucket`. Buckets strictly older than this are evicted.
    fn horizon(&self, bucket: i64) -> i64 {
        bucket - self.window_minutes * SECS_PER_MINUTE
    }

    /// Seconds from `now` until `oldest` stops being counted.
    fn reset_secs(&self, oldest: i64, now: i64) -> i64 {
        let expires_at = oldest + (self.window_minutes + 1) * SECS_PER_MINUTE;
        (expires_at - now).max(0)
    }

    fn headers(&self, oldest: i64, now: i64) -> RateLimitHeaders {
        RateLimitHeaders {
            limit: self.limit,
            remaining: None,
            reset_secs: Some(self.reset_secs(oldest, now)),
        }
    }
}

#[async_trait]
impl RateLimiterBackend for SlidingWindowLimiter {
    fn name(&self) -> &'static str {
        "sliding_window"
    }

    async fn admit(&self) -> Result<Admission> {
        let now = self.clock.now().timestamp();
        let bucket = minute_floor(now);

        let current = self
            .store
            .hincr(&self.key, &bucket.to_string(), 1)
            .await?;

        if current > self.limit {
            debug!(
                key = %self.key,
                bucket = bucket,
                count = current,
                "Current minute alone exceeds the limit"
            );
            return Ok(Admission {
                decision: Decision::Denied,
                headers: self.headers(bucket, now),
            });
        }

        let horizon = self.horizon(bucket);
        let mut total = 0i64;
        let mut oldest = bucket;
        let mut evicted = 0usize;

        for (field, raw_count) in self.store.hgetall(&self.key).await? {
            let timestamp: i64 = field.parse().map_err(|_| {
                SluiceError::malformed(&self.key, format!("bucket '{}' is not a timestamp", field))
            })?;

            if timestamp < horizon {
                self.store.hdel(&self.key, &field).await?;
                evicted += 1;
                continue;
            }

            let count: i64 = raw_count.parse().map_err(|_| {
                SluiceError::malformed(
                    &self.key,
                    format!("count '{}' in bucket '{}' is not an integer", raw_count, field),
                )
            })?;
            total += count;
            oldest = oldest.min(timestamp);
        }

        if evicted > 0 {
            debug!(key = %self.key, evicted = evicted, "Evicted stale window buckets");
        }

        let decision = if total > self.limit {
            debug!(key = %self.key, total = total, limit = self.limit, "Window limit exceeded");
            Decision::Denied
        } else {
            trace!(key = %self.key, total = total, "Admitted within window");
            Decision::Allowed
        };

        Ok(Admission {
            decision,
            headers: self.headers(oldest, now),
        })
    }
}
