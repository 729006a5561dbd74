//! Counter store abstraction shared by every limiter instance.
//!
//! The store owns all rate limiting state. Each operation is atomic on its
//! own; no sequence of calls is assumed to be transactional.

mod memory;
mod redis_store;

use async_trait::async_trait;

use crate::error::Result;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Outcome of [`CounterStore::take_if_positive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Take {
    /// Counter value before the call
    pub observed: i64,
    /// Whether one unit was removed
    pub taken: bool,
}

/// Trait for counter store implementations.
///
/// This trait abstracts over Redis and the in-process store so limiters can
/// be constructed against either.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Set `key` to `value` unless it already holds a value.
    ///
    /// Returns `true` when the value was written.
    async fn set_if_absent(&self, key: &str, value: i64) -> Result<bool>;

    /// Atomically decrement `key` when its value is strictly positive.
    async fn take_if_positive(&self, key: &str) -> Result<Take>;

    /// Atomically increment `key` when its value is strictly below `ceiling`.
    ///
    /// Returns the new value when an increment happened.
    async fn restore_if_below(&self, key: &str, ceiling: i64) -> Result<Option<i64>>;

    /// Increment a field of the hash at `key`, returning the new value.
    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    /// Read every field of the hash at `key` as raw text.
    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>>;

    /// Remove a field from the hash at `key`.
    async fn hdel(&self, key: &str, field: &str) -> Result<()>;

    /// Round trip to the store without touching any key.
    async fn ping(&self) -> Result<()>;
}

/// Parse a stored scalar the way both implementations report it.
pub(crate) fn parse_counter(key: &str, raw: &str) -> Result<i64> {
    raw.trim().parse::<i64>().map_err(|_| {
        crate::error::SluiceError::malformed(key, format!("'{}' is not an integer", raw))
    })
}
