//! Rate limiter trait for abstracting over admission algorithms.

use async_trait::async_trait;

use crate::error::Result;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed to the downstream handler
    Allowed,
    /// The limit has been reached
    Denied,
}

/// Informational values exposed as `x-ratelimit-*` response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// Configured limit
    pub limit: i64,
    /// Remaining capacity, for algorithms that track one
    pub remaining: Option<i64>,
    /// Seconds until capacity is fully available again
    pub reset_secs: Option<i64>,
}

/// Result of a successful admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub decision: Decision,
    pub headers: RateLimitHeaders,
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allowed
    }
}

/// Trait for rate limiter implementations.
///
/// Implementations keep no authoritative state of their own; every call
/// consults the shared counter store. Storage failures are returned as errors
/// and never folded into a decision.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Decide whether one more request may be admitted.
    async fn admit(&self) -> Result<Admission>;
}
