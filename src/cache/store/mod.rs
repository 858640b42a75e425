//! Pluggable key/value stores with expiry.
//!
//! Every backend speaks the same contract:
//!
//! - [`Store::get`] returns `None` on a miss or when the stored entry has
//!   expired.
//! - [`Store::add`] writes only if the key holds no live value.
//! - [`Store::put`] always writes.
//!
//! Values are persisted in the [`entry`](super::entry) wire format. Backends
//! with native TTL support also hand the expiry to the server so stale keys
//! disappear on their own; the file backend deletes expired files when it
//! reads them.
//!
//! Use [`make_store`] to build the backend selected by configuration.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use super::entry::{DecodeError, Payload};
use crate::config::StoreConfig;

mod async_redis;
mod file;
mod memcache;
mod redis;

pub use self::async_redis::AsyncRedisStore;
pub use self::file::FileStore;
pub use self::memcache::MemcacheStore;
pub use self::redis::RedisStore;

/// Errors produced by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("redis command failed: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("redis connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("memcache command failed: {0}")]
    Memcache(#[from] ::memcache::MemcacheError),

    #[error("blocking store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// A key/value backend with expiry-aware reads.
///
/// Implementations must be safe to share across tasks; the service container
/// hands one instance to every request.
#[async_trait]
pub trait Store: Send + Sync + fmt::Debug {
    /// Reads the live value for `key`.
    async fn get(&self, key: &str) -> Result<Option<Payload>, StoreError>;

    /// Writes `value` only if `key` has no live value.
    ///
    /// Returns `false` without touching the existing value otherwise.
    async fn add(&self, key: &str, value: &str, expires_at: DateTime<Utc>)
    -> Result<bool, StoreError>;

    /// Writes `value`, replacing anything stored under `key`.
    async fn put(&self, key: &str, value: &str, expires_at: DateTime<Utc>)
    -> Result<bool, StoreError>;
}

/// Builds the store described by `config`.
///
/// Network stores that connect eagerly (async Redis, memcache) fail here if
/// the server is unreachable.
pub async fn make_store(config: &StoreConfig) -> Result<Arc<dyn Store>, StoreError> {
    let store: Arc<dyn Store> = match config {
        StoreConfig::File(c) => Arc::new(FileStore::new(&c.directory)),
        StoreConfig::Redis(c) => Arc::new(RedisStore::connect(c)?),
        StoreConfig::AsyncRedis(c) => Arc::new(AsyncRedisStore::connect(c).await?),
        StoreConfig::Memcache(c) => Arc::new(MemcacheStore::connect(c).await?),
    };
    info!(driver = %config.driver(), "cache store ready");
    Ok(store)
}

/// Writes `value` unless `key` holds a live value.
///
/// Liveness is decided from the decoded payload, not from the backend's own
/// TTL, which may keep a key around slightly past its `expires_at`.
pub(crate) async fn add_if_vacant<S>(
    store: &S,
    key: &str,
    value: &str,
    expires_at: DateTime<Utc>,
) -> Result<bool, StoreError>
where
    S: Store + ?Sized,
{
    if store.get(key).await?.is_some() {
        return Ok(false);
    }
    store.put(key, value, expires_at).await
}

/// Whole seconds from `now` until `expires_at`, rounded up and at least one.
///
/// Network backends treat a zero TTL as "never expire" or reject it, so an
/// already-expired entry is given the shortest TTL they accept.
pub(crate) fn ttl_seconds(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let remaining = expires_at - now;
    let secs = remaining.num_seconds();
    let rounded = if remaining > chrono::Duration::seconds(secs) {
        secs + 1
    } else {
        secs
    };
    rounded.max(1) as u64
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileStoreConfig;
    use chrono::{Duration, TimeZone};

    #[test]
    fn ttl_rounds_up_partial_seconds() {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(ttl_seconds(now + Duration::seconds(60), now), 60);
        assert_eq!(ttl_seconds(now + Duration::milliseconds(59_001), now), 60);
        assert_eq!(ttl_seconds(now + Duration::milliseconds(1), now), 1);
    }

    #[test]
    fn ttl_never_drops_below_one_second() {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(ttl_seconds(now, now), 1);
        assert_eq!(ttl_seconds(now - Duration::seconds(30), now), 1);
    }

    #[tokio::test]
    async fn add_overwrites_payload_past_its_expiry() {
        let store = testing::MemoryStore::default();
        let now = Utc::now();
        store.put("k", "stale", now - Duration::milliseconds(200)).await.unwrap();

        assert!(add_if_vacant(&store, "k", "fresh", now + Duration::seconds(30)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().unwrap().data, "fresh");

        assert!(!add_if_vacant(&store, "k", "late", now + Duration::seconds(30)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().unwrap().data, "fresh");
    }

    #[tokio::test]
    async fn make_store_builds_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::File(FileStoreConfig {
            directory: dir.path().to_path_buf(),
        });
        let store = make_store(&config).await.unwrap();
        let expires_at = Utc::now() + Duration::seconds(30);
        assert!(store.put("k", "v", expires_at).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().unwrap().data, "v");
    }

    #[tokio::test]
    async fn make_store_redis_defers_connection() {
        let config = StoreConfig::Redis(crate::config::RedisConfig {
            host: "127.0.0.1".to_owned(),
            port: 1,
            db: 0,
            password: None,
        });
        assert!(make_store(&config).await.is_ok());
    }
}
