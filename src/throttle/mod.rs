//! Fixed-window rate limiting on top of [`Cache`].
//!
//! The counter for a client lives in one cache entry: the value is the
//! number of hits so far and the expiry is the moment the window resets.
//! The expiry is written by the first hit of a window and left alone by the
//! rest, so every hit in a window reports the same reset time.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hitgate::cache::{Cache, store::FileStore};
//! use hitgate::throttle::{RateLimitError, RateLimiter};
//!
//! # async fn example() -> Result<(), RateLimitError> {
//! let cache = Cache::new(Arc::new(FileStore::new("/tmp/cache")), None);
//! let mut limiter = RateLimiter::load(cache, "client-42", 60, 60).await?;
//!
//! match limiter.hit().await {
//!     Ok(hits) => println!("hit {hits} of {}", limiter.max_hits()),
//!     Err(RateLimitError::Exceeded { available_in, .. }) => {
//!         println!("retry in {available_in}s")
//!     }
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::debug;

use crate::cache::{Cache, CacheError};

mod middleware;

pub use self::middleware::{
    LIMIT_HEADER, RESET_HEADER, REMAINING_HEADER, RateLimitStatus, ThrottleMiddleware,
};

/// Errors produced by [`RateLimiter`].
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The window's quota is used up. This is the expected rejection path,
    /// not a fault.
    #[error("Too many requests.")]
    Exceeded { max_hits: u64, available_in: u64 },

    #[error("rate limit window of {decay} seconds is out of range")]
    InvalidDecay { decay: u64 },

    #[error("rate limit counter `{value}` is not a number")]
    InvalidCounter { value: String },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Hit counter for one client over a fixed window of `decay` seconds.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    cache: Cache,
    max_hits: u64,
    decay: u64,
    window: Duration,
}

impl RateLimiter {
    /// Loads the counter stored under `key` and binds the limiter to it.
    ///
    /// # Errors
    ///
    /// [`RateLimitError::InvalidDecay`] if a window of `decay` seconds cannot
    /// be represented as a timestamp, otherwise the cache's error.
    pub async fn load(
        mut cache: Cache,
        key: impl Into<String>,
        max_hits: u64,
        decay: u64,
    ) -> Result<Self, RateLimitError> {
        let window = window_length(decay).ok_or(RateLimitError::InvalidDecay { decay })?;
        cache.load(key).await?;
        Ok(Self {
            cache,
            max_hits,
            decay,
            window,
        })
    }

    pub fn max_hits(&self) -> u64 {
        self.max_hits
    }

    /// Window length in seconds.
    pub fn decay(&self) -> u64 {
        self.decay
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Hits recorded in the current window; `0` when none is open.
    pub fn get_hits(&self) -> Result<u64, RateLimitError> {
        current_hits(&self.cache)
    }

    /// Persists `hits`, opening a window if none is open.
    pub async fn set_hits(&mut self, hits: u64) -> Result<(), RateLimitError> {
        store_hits(&mut self.cache, hits, self.decay, self.window).await
    }

    /// Records one hit and returns the new count.
    ///
    /// # Errors
    ///
    /// [`RateLimitError::Exceeded`] when `max_hits` is already reached. The
    /// stored counter is left unchanged in that case.
    pub async fn hit(&mut self) -> Result<u64, RateLimitError> {
        record_hit(&mut self.cache, self.max_hits, self.decay, self.window).await
    }

    /// Like [`hit`](Self::hit), but re-reads and writes the counter while
    /// holding the cache lock, so concurrent hits from other processes are
    /// not lost.
    pub async fn hit_secured(&mut self) -> Result<u64, RateLimitError> {
        let (max_hits, decay, window) = (self.max_hits, self.decay, self.window);
        self.cache
            .secure(move |cache| {
                Box::pin(async move {
                    if let Some(key) = cache.key().map(str::to_owned) {
                        cache.load(key).await?;
                    }
                    record_hit(cache, max_hits, decay, window).await
                })
            })
            .await?
    }

    /// Seconds until the window resets, rounded up; `decay` when no window
    /// is open.
    pub fn available_in(&self) -> u64 {
        seconds_until_reset(&self.cache, self.decay)
    }

    /// Hits left in the current window.
    pub fn remaining_hits(&self) -> Result<u64, RateLimitError> {
        Ok(self.max_hits.saturating_sub(self.get_hits()?))
    }

    /// `true` once a hit has opened a window that has not yet expired.
    pub fn window_open(&self) -> bool {
        self.cache.expires_at().is_some()
    }
}

/// Length of a `decay`-second window, if a window opened now would end at a
/// representable time.
pub(crate) fn window_length(decay: u64) -> Option<Duration> {
    let window = Duration::try_seconds(i64::try_from(decay).ok()?)?;
    Utc::now().checked_add_signed(window)?;
    Some(window)
}

fn current_hits(cache: &Cache) -> Result<u64, RateLimitError> {
    match cache.value() {
        None => Ok(0),
        Some(value) => value.parse().map_err(|_| RateLimitError::InvalidCounter {
            value: value.to_owned(),
        }),
    }
}

async fn store_hits(
    cache: &mut Cache,
    hits: u64,
    decay: u64,
    window: Duration,
) -> Result<(), RateLimitError> {
    if cache.expires_at().is_none() {
        let resets_at = Utc::now()
            .checked_add_signed(window)
            .ok_or(RateLimitError::InvalidDecay { decay })?;
        cache.set_expires_at(resets_at);
    }
    cache.set_value(hits.to_string());
    cache.update().await?;
    Ok(())
}

async fn record_hit(
    cache: &mut Cache,
    max_hits: u64,
    decay: u64,
    window: Duration,
) -> Result<u64, RateLimitError> {
    let hits = current_hits(cache)?;
    if hits >= max_hits {
        debug!(key = cache.key(), hits, max_hits, "rate limit exceeded");
        return Err(RateLimitError::Exceeded {
            max_hits,
            available_in: seconds_until_reset(cache, decay),
        });
    }
    store_hits(cache, hits + 1, decay, window).await?;
    Ok(hits + 1)
}

fn seconds_until_reset(cache: &Cache, decay: u64) -> u64 {
    let Some(expires_at) = cache.expires_at() else {
        return decay;
    };
    let millis = (expires_at - Utc::now()).num_milliseconds().max(0);
    (millis as u64).div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::locker::testing::MemoryNode;
    use crate::cache::locker::{Locker, RedisLocker, Redlock};
    use crate::cache::store::Store;
    use crate::cache::store::testing::MemoryStore;

    fn cache(store: &Arc<MemoryStore>) -> Cache {
        Cache::new(Arc::clone(store) as Arc<dyn Store>, None)
    }

    #[tokio::test]
    async fn fresh_key_has_no_hits_and_full_window() {
        let store = Arc::new(MemoryStore::default());
        let limiter = RateLimiter::load(cache(&store), "k", 5, 60).await.unwrap();

        assert_eq!(limiter.get_hits().unwrap(), 0);
        assert_eq!(limiter.remaining_hits().unwrap(), 5);
        assert_eq!(limiter.available_in(), 60);
        assert!(!limiter.window_open());
    }

    #[tokio::test]
    async fn hits_up_to_limit_then_rejects_without_writing() {
        let store = Arc::new(MemoryStore::default());
        let mut limiter = RateLimiter::load(cache(&store), "k", 3, 60).await.unwrap();

        for expected in 1..=3 {
            assert_eq!(limiter.hit().await.unwrap(), expected);
        }
        let writes = store.puts();

        let err = limiter.hit().await.unwrap_err();
        assert!(matches!(err, RateLimitError::Exceeded { max_hits: 3, .. }));
        assert_eq!(limiter.get_hits().unwrap(), 3);
        assert_eq!(limiter.remaining_hits().unwrap(), 0);
        assert_eq!(store.puts(), writes);
    }

    #[tokio::test]
    async fn window_reset_time_is_fixed_by_first_hit() {
        let store = Arc::new(MemoryStore::default());
        let mut limiter = RateLimiter::load(cache(&store), "k", 10, 60).await.unwrap();

        limiter.hit().await.unwrap();
        let opened = limiter.cache().expires_at().unwrap();
        limiter.hit().await.unwrap();
        assert_eq!(limiter.cache().expires_at(), Some(opened));

        let reloaded = RateLimiter::load(cache(&store), "k", 10, 60).await.unwrap();
        assert_eq!(reloaded.get_hits().unwrap(), 2);
        assert_eq!(reloaded.cache().expires_at(), Some(opened));
        assert!(reloaded.window_open());
        assert!((59..=60).contains(&reloaded.available_in()));
    }

    #[tokio::test]
    async fn set_hits_keeps_existing_window() {
        let store = Arc::new(MemoryStore::default());
        let mut limiter = RateLimiter::load(cache(&store), "k", 10, 30).await.unwrap();

        limiter.set_hits(4).await.unwrap();
        let opened = limiter.cache().expires_at().unwrap();
        limiter.set_hits(7).await.unwrap();

        assert_eq!(limiter.get_hits().unwrap(), 7);
        assert_eq!(limiter.cache().expires_at(), Some(opened));
    }

    #[tokio::test]
    async fn expired_window_starts_over() {
        let store = Arc::new(MemoryStore::default());
        store
            .put("k", "9", Utc::now() - Duration::seconds(1))
            .await
            .unwrap();

        let mut limiter = RateLimiter::load(cache(&store), "k", 2, 60).await.unwrap();
        assert_eq!(limiter.get_hits().unwrap(), 0);
        assert_eq!(limiter.hit().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unrepresentable_window_is_rejected_on_load() {
        let store = Arc::new(MemoryStore::default());
        for decay in [10_000_000_000_000_000, u64::MAX] {
            let err = RateLimiter::load(cache(&store), "k", 1, decay)
                .await
                .unwrap_err();
            assert!(matches!(err, RateLimitError::InvalidDecay { decay: d } if d == decay));
        }
        assert_eq!(store.puts(), 0);
    }

    #[tokio::test]
    async fn long_window_still_limits() {
        let store = Arc::new(MemoryStore::default());
        let decay = 10 * 365 * 24 * 60 * 60;
        for _ in 0..3 {
            let mut limiter = RateLimiter::load(cache(&store), "k", 1, decay).await.unwrap();
            let _ = limiter.hit().await;
        }

        let mut limiter = RateLimiter::load(cache(&store), "k", 1, decay).await.unwrap();
        assert!(limiter.cache().expires_at().unwrap() > Utc::now());
        assert!(matches!(limiter.hit().await, Err(RateLimitError::Exceeded { .. })));
    }

    #[tokio::test]
    async fn non_numeric_counter_is_reported() {
        let store = Arc::new(MemoryStore::default());
        store
            .put("k", "lots", Utc::now() + Duration::seconds(60))
            .await
            .unwrap();

        let limiter = RateLimiter::load(cache(&store), "k", 2, 60).await.unwrap();
        assert!(matches!(
            limiter.get_hits(),
            Err(RateLimitError::InvalidCounter { ref value }) if value == "lots"
        ));
    }

    #[tokio::test]
    async fn secured_hits_see_writes_from_other_limiters() {
        let store = Arc::new(MemoryStore::default());
        let locker: Arc<dyn Locker> = Arc::new(RedisLocker::new(
            Redlock::new(vec![Arc::new(MemoryNode::default())])
                .with_retry_count(1)
                .with_retry_delay(std::time::Duration::ZERO, std::time::Duration::ZERO),
        ));
        let locked = || Cache::new(Arc::clone(&store) as Arc<dyn Store>, Some(Arc::clone(&locker)));

        let mut a = RateLimiter::load(locked(), "k", 3, 60).await.unwrap();
        let mut b = RateLimiter::load(locked(), "k", 3, 60).await.unwrap();

        assert_eq!(a.hit_secured().await.unwrap(), 1);
        assert_eq!(b.hit_secured().await.unwrap(), 2);
        assert_eq!(a.hit_secured().await.unwrap(), 3);
        assert!(matches!(
            b.hit_secured().await,
            Err(RateLimitError::Exceeded { .. })
        ));
    }

    #[tokio::test]
    async fn secured_hit_without_locker_fails() {
        let store = Arc::new(MemoryStore::default());
        let mut limiter = RateLimiter::load(cache(&store), "k", 3, 60).await.unwrap();
        assert!(matches!(
            limiter.hit_secured().await,
            Err(RateLimitError::Cache(CacheError::Lock(_)))
        ));
        assert_eq!(store.puts(), 0);
    }
}
