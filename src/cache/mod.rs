//! Cache façade over a [`Store`] and an optional [`Locker`].
//!
//! A [`Cache`] holds one loaded entry at a time: [`Cache::load`] reads a key
//! into the façade, the caller edits the value and expiry, and
//! [`Cache::update`] writes them back. Read-modify-write cycles that must not
//! interleave across processes run inside [`Cache::secure`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chrono::{Duration, Utc};
//! use hitgate::cache::{Cache, store::FileStore};
//!
//! # async fn example() -> Result<(), hitgate::cache::CacheError> {
//! let mut cache = Cache::new(Arc::new(FileStore::new("/tmp/cache")), None);
//! cache.load("greeting").await?;
//! if cache.value().is_none() {
//!     cache.set_value("hello");
//!     cache.set_expires_at(Utc::now() + Duration::minutes(5));
//!     cache.update().await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, warn};

pub mod entry;
pub mod locker;
pub mod store;

use self::locker::{DEFAULT_LOCK_TTL, LockError, LockStateError, Locker};
use self::store::{Store, StoreError};

/// Errors produced by the cache façade.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl From<LockStateError> for CacheError {
    fn from(e: LockStateError) -> Self {
        Self::Lock(e.into())
    }
}

/// One loaded cache entry bound to a store and an optional locker.
#[derive(Debug, Clone)]
pub struct Cache {
    store: Arc<dyn Store>,
    locker: Option<Arc<dyn Locker>>,
    key: Option<String>,
    value: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl Cache {
    pub fn new(store: Arc<dyn Store>, locker: Option<Arc<dyn Locker>>) -> Self {
        Self {
            store,
            locker,
            key: None,
            value: None,
            expires_at: None,
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = Some(value.into());
    }

    pub fn set_expires_at(&mut self, expires_at: DateTime<Utc>) {
        self.expires_at = Some(expires_at);
    }

    pub fn has_locker(&self) -> bool {
        self.locker.is_some()
    }

    /// Reads `key` from the store and makes it the current entry.
    ///
    /// A miss or an expired entry leaves value and expiry unset.
    pub async fn load(&mut self, key: impl Into<String>) -> Result<(), CacheError> {
        let key = key.into();
        let payload = self.store.get(&key).await?;
        debug!(key = %key, hit = payload.is_some(), "cache entry loaded");

        (self.value, self.expires_at) = match payload {
            Some(p) => (Some(p.data), Some(p.expires_at)),
            None => (None, None),
        };
        self.key = Some(key);
        Ok(())
    }

    /// Writes the current value and expiry back to the store.
    ///
    /// Returns `false` without touching the store if either is unset.
    ///
    /// # Errors
    ///
    /// [`LockStateError::NoKey`] if nothing was loaded, or the store's error.
    pub async fn update(&mut self) -> Result<bool, CacheError> {
        let key = self.key.as_deref().ok_or(LockStateError::NoKey)?;
        let (Some(value), Some(expires_at)) = (self.value.as_deref(), self.expires_at) else {
            debug!(key, "cache update skipped, entry incomplete");
            return Ok(false);
        };

        let written = self.store.put(key, value, expires_at).await?;
        debug!(key, %expires_at, "cache entry written");
        Ok(written)
    }

    /// Locks the loaded key for [`DEFAULT_LOCK_TTL`].
    pub async fn lock(&self) -> Result<(), CacheError> {
        self.lock_for(DEFAULT_LOCK_TTL).await
    }

    /// Locks the loaded key for `ttl`.
    ///
    /// # Errors
    ///
    /// [`LockStateError::NoLocker`] or [`LockStateError::NoKey`] when the
    /// cache cannot lock, otherwise the locker's error.
    pub async fn lock_for(&self, ttl: Duration) -> Result<(), CacheError> {
        let (locker, key) = self.lock_target()?;
        locker.lock(key, ttl).await?;
        Ok(())
    }

    /// Releases the lock on the loaded key.
    pub async fn unlock(&self) -> Result<(), CacheError> {
        let (locker, key) = self.lock_target()?;
        locker.unlock(key).await?;
        Ok(())
    }

    /// Runs `f` while holding the lock on the loaded key.
    ///
    /// The lock is released however `f` finishes. If the returned future is
    /// dropped or `f` panics, the release is spawned onto the current tokio
    /// runtime.
    ///
    /// ```rust,no_run
    /// # async fn example(mut cache: hitgate::cache::Cache) -> Result<(), hitgate::cache::CacheError> {
    /// cache.load("counter").await?;
    /// let written = cache
    ///     .secure(|cache| Box::pin(async move {
    ///         cache.set_value("1");
    ///         cache.update().await
    ///     }))
    ///     .await??;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn secure<T, F>(&mut self, f: F) -> Result<T, CacheError>
    where
        F: for<'c> FnOnce(&'c mut Cache) -> Pin<Box<dyn Future<Output = T> + Send + 'c>>,
    {
        let (locker, key) = self.lock_target()?;
        let (locker, key) = (Arc::clone(locker), key.to_owned());

        locker.lock(&key, DEFAULT_LOCK_TTL).await?;
        let mut guard = UnlockGuard {
            locker: Arc::clone(&locker),
            key: key.clone(),
            armed: true,
        };

        let output = f(self).await;

        let released = locker.unlock(&key).await;
        guard.armed = false;
        released?;
        Ok(output)
    }

    fn lock_target(&self) -> Result<(&Arc<dyn Locker>, &str), LockStateError> {
        let locker = self.locker.as_ref().ok_or(LockStateError::NoLocker)?;
        let key = self.key.as_deref().ok_or(LockStateError::NoKey)?;
        Ok((locker, key))
    }
}

/// Releases a lock whose holder never reached its own unlock.
struct UnlockGuard {
    locker: Arc<dyn Locker>,
    key: String,
    armed: bool,
}

impl Drop for UnlockGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let key = std::mem::take(&mut self.key);
        let Ok(handle) = Handle::try_current() else {
            warn!(key = %key, "no runtime to release abandoned lock, waiting for expiry");
            return;
        };
        let locker = Arc::clone(&self.locker);
        handle.spawn(async move {
            if let Err(e) = locker.unlock(&key).await {
                warn!(key = %key, error = %e, "failed to release abandoned lock");
            }
        });
    }
}
