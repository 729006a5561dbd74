//! Fixed-capacity bucket with a background replenisher.
//!
//! One shared counter holds the remaining capacity. Admitted requests take one
//! unit; the replenisher puts one unit back per tick until the bucket is full.
//! Both mutations are single conditional store operations, so concurrent
//! admits cannot drive the counter below zero and concurrent replenishers
//! cannot push it above the limit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use super::backend::{Admission, Decision, RateLimitHeaders, RateLimiterBackend};
use crate::error::{Result, SluiceError};
use crate::store::CounterStore;

/// Rate limiter admitting at most `limit` requests per replenishment cycle.
pub struct FixedBucketLimiter {
    store: Arc<dyn CounterStore>,
    key: String,
    limit: i64,
    interval: Duration,
}

impl FixedBucketLimiter {
    /// Create a limiter over the capacity counter stored at `key`.
    ///
    /// Call [`FixedBucketLimiter::initialize`] before admitting requests.
    pub fn new(
        store: Arc<dyn CounterStore>,
        key: impl Into<String>,
        limit: i64,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            limit,
            interval,
        }
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Seed the capacity counter with the full limit unless another instance
    /// (or a previous run) already did.
    ///
    /// Returns `true` when the counter was seeded.
    pub async fn initialize(&self) -> Result<bool> {
        let seeded = self.store.set_if_absent(&self.key, self.limit).await?;
        if seeded {
            info!(key = %self.key, limit = self.limit, "Seeded capacity counter");
        } else {
            info!(key = %self.key, "Capacity counter already present, keeping its value");
        }
        Ok(seeded)
    }

    /// Restore one unit of capacity if the bucket is below its limit.
    ///
    /// Returns the new counter value when a unit was restored. A counter that
    /// has been deleted from the store is seeded again.
    pub async fn replenish_once(&self) -> Result<Option<i64>> {
        match self.store.restore_if_below(&self.key, self.limit).await {
            Ok(restored) => {
                if let Some(value) = restored {
                    trace!(key = %self.key, value = value, "Restored one unit of capacity");
                }
                Ok(restored)
            }
            Err(SluiceError::MissingCounter(_)) => {
                warn!(key = %self.key, "Capacity counter disappeared, seeding it again");
                self.initialize().await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Seconds until the bucket is full again, starting from `value`.
    fn reset_secs(&self, value: i64) -> i64 {
        let deficit = (self.limit - value).max(0);
        let millis = deficit.saturating_mul(self.interval.as_millis() as i64);
        (millis + 999) / 1000
    }
}

#[async_trait]
impl RateLimiterBackend for FixedBucketLimiter {
    fn name(&self) -> &'static str {
        "fixed_bucket"
    }

    async fn admit(&self) -> Result<Admission> {
        let take = self.store.take_if_positive(&self.key).await?;
        let after = if take.taken { take.observed - 1 } else { take.observed };

        let headers = RateLimitHeaders {
            limit: self.limit,
            remaining: Some(take.observed.max(0)),
            reset_secs: Some(self.reset_secs(after)),
        };

        let decision = if take.taken {
            trace!(key = %self.key, remaining = take.observed, "Admitted from bucket");
            Decision::Allowed
        } else {
            debug!(key = %self.key, observed = take.observed, "Bucket exhausted");
            Decision::Denied
        };

        Ok(Admission { decision, headers })
    }
}

/// Background task restoring bucket capacity on a fixed tick.
///
/// The task runs until [`Replenisher::shutdown`] is called or the
/// `Replenisher` is dropped.
pub struct Replenisher {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Replenisher {
    /// Start ticking every `limiter.interval()`.
    pub fn spawn(limiter: Arc<FixedBucketLimiter>) -> Self {
        let (shutdown, mut signal) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            info!(
                interval_ms = limiter.interval().as_millis() as u64,
                "Replenisher started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = limiter.replenish_once().await {
                            warn!(error = %e, "Replenish tick failed, retrying on next tick");
                        }
                    }
                    _ = signal.changed() => break,
                }
            }

            info!("Replenisher stopped");
        });

        Self { shutdown, handle }
    }

    /// Signal the task to stop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Replenisher task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const LIMIT: i64 = 10;

    async fn limiter_with_store(limit: i64, interval: Duration) -> (Arc<MemoryStore>, FixedBucketLimiter) {
        let store = Arc::new(MemoryStore::new());
        let limiter = FixedBucketLimiter::new(store.clone(), "bucket", limit, interval);
        limiter.initialize().await.unwrap();
        (store, limiter)
    }

    #[tokio::test]
    async fn test_initialize_preserves_existing_budget() {
        let store = Arc::new(MemoryStore::new());
        store.set_raw("bucket", "4");

        let limiter = FixedBucketLimiter::new(store.clone(), "bucket", LIMIT, Duration::from_secs(1));
        assert!(!limiter.initialize().await.unwrap());
        assert_eq!(store.value("bucket").as_deref(), Some("4"));
    }

    #[tokio::test]
    async fn test_limit_admits_then_denies() {
        let (_store, limiter) = limiter_with_store(LIMIT, Duration::from_secs(1)).await;

        for expected in (1..=LIMIT).rev() {
            let admission = limiter.admit().await.unwrap();
            assert_eq!(admission.decision, Decision::Allowed);
            assert_eq!(admission.headers.remaining, Some(expected));
            assert_eq!(admission.headers.limit, LIMIT);
        }

        let denied = limiter.admit().await.unwrap();
        assert_eq!(denied.decision, Decision::Denied);
        assert_eq!(denied.headers.remaining, Some(0));
    }

    #[tokio::test]
    async fn test_denial_does_not_touch_counter() {
        let (store, limiter) = limiter_with_store(2, Duration::from_secs(1)).await;
        limiter.admit().await.unwrap();
        limiter.admit().await.unwrap();

        for _ in 0..5 {
            assert!(!limiter.admit().await.unwrap().is_allowed());
        }
        assert_eq!(store.value("bucket").as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_one_tick_restores_one_request() {
        let (_store, limiter) = limiter_with_store(LIMIT, Duration::from_secs(1)).await;
        for _ in 0..LIMIT {
            limiter.admit().await.unwrap();
        }
        assert!(!limiter.admit().await.unwrap().is_allowed());

        assert_eq!(limiter.replenish_once().await.unwrap(), Some(1));

        let admitted = limiter.admit().await.unwrap();
        assert!(admitted.is_allowed());
        assert_eq!(admitted.headers.remaining, Some(1));
        assert!(!limiter.admit().await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_replenish_stops_at_limit() {
        let (store, limiter) = limiter_with_store(LIMIT, Duration::from_secs(1)).await;

        assert_eq!(limiter.replenish_once().await.unwrap(), None);
        assert_eq!(store.value("bucket").as_deref(), Some("10"));
    }

    #[tokio::test]
    async fn test_replenish_reseeds_deleted_counter() {
        let store = Arc::new(MemoryStore::new());
        let limiter = FixedBucketLimiter::new(store.clone(), "bucket", LIMIT, Duration::from_secs(1));

        assert_eq!(limiter.replenish_once().await.unwrap(), None);
        assert_eq!(store.value("bucket").as_deref(), Some("10"));
    }

    #[tokio::test]
    async fn test_reset_reports_time_to_full() {
        let (_store, limiter) = limiter_with_store(LIMIT, Duration::from_millis(1500)).await;

        let first = limiter.admit().await.unwrap();
        assert_eq!(first.headers.reset_secs, Some(2));

        for _ in 1..LIMIT {
            limiter.admit().await.unwrap();
        }
        let denied = limiter.admit().await.unwrap();
        assert_eq!(denied.headers.reset_secs, Some(15));
    }

    // The take is a single atomic store call, so concurrent admits are capped
    // exactly at the limit instead of racing past zero.
    #[tokio::test]
    async fn test_concurrent_admits_never_over_decrement() {
        let (store, limiter) = limiter_with_store(LIMIT, Duration::from_secs(1)).await;
        let limiter = Arc::new(limiter);

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let limiter = limiter.clone();
            tasks.push(tokio::spawn(async move { limiter.admit().await.unwrap() }));
        }

        let mut allowed = 0;
        for task in tasks {
            if task.await.unwrap().is_allowed() {
                allowed += 1;
            }
        }

        assert_eq!(allowed, LIMIT);
        assert_eq!(store.value("bucket").as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_malformed_counter_is_an_error() {
        let (store, limiter) = limiter_with_store(LIMIT, Duration::from_secs(1)).await;
        store.set_raw("bucket", "ten");

        assert!(matches!(
            limiter.admit().await,
            Err(SluiceError::MalformedState { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_store_is_an_error() {
        let (store, limiter) = limiter_with_store(LIMIT, Duration::from_secs(1)).await;
        store.set_online(false);

        assert!(matches!(
            limiter.admit().await,
            Err(SluiceError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_replenisher_refills_and_stops() {
        let (store, limiter) = limiter_with_store(2, Duration::from_millis(10)).await;
        let limiter = Arc::new(limiter);
        limiter.admit().await.unwrap();
        limiter.admit().await.unwrap();
        assert_eq!(store.value("bucket").as_deref(), Some("0"));

        let replenisher = Replenisher::spawn(limiter.clone());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.value("bucket").as_deref(), Some("2"));

        tokio::time::timeout(Duration::from_secs(1), replenisher.shutdown())
            .await
            .expect("replenisher should stop promptly");

        limiter.admit().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.value("bucket").as_deref(), Some("1"));
    }
}
