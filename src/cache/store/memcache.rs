use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Store, StoreError, add_if_vacant, ttl_seconds};
use crate::cache::entry::{self, Payload};
use crate::config::MemcacheConfig;

/// Memcache store.
///
/// Memcache takes whole-second TTLs, so the remaining lifetime is rounded
/// up. The client is blocking and runs on tokio's blocking pool.
#[derive(Clone)]
pub struct MemcacheStore {
    client: Arc<::memcache::Client>,
}

impl fmt::Debug for MemcacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemcacheStore").finish_non_exhaustive()
    }
}

impl MemcacheStore {
    /// Connects to the memcache server.
    ///
    /// # Errors
    ///
    /// [`StoreError::Memcache`] if the server cannot be reached.
    pub async fn connect(config: &MemcacheConfig) -> Result<Self, StoreError> {
        let url = config.url();
        let client =
            tokio::task::spawn_blocking(move || ::memcache::Client::connect(url.as_str())).await??;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    async fn fetch(&self, key: &str) -> Result<Option<String>, StoreError> {
        let client = Arc::clone(&self.client);
        let key = key.to_owned();
        let raw = tokio::task::spawn_blocking(move || client.get::<String>(&key)).await??;
        Ok(raw)
    }
}

// Memcache reads expirations above 30 days as absolute unix times.
const MAX_RELATIVE_TTL: u64 = 60 * 60 * 24 * 30;

fn expiration(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let ttl = ttl_seconds(expires_at, now);
    let value = if ttl > MAX_RELATIVE_TTL {
        u64::try_from(expires_at.timestamp()).unwrap_or(0) + 1
    } else {
        ttl
    };
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[async_trait]
impl Store for MemcacheStore {
    async fn get(&self, key: &str) -> Result<Option<Payload>, StoreError> {
        let contents = self.fetch(key).await?;
        Ok(entry::process(contents, Utc::now())?)
    }

    async fn add(
        &self,
        key: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        add_if_vacant(self, key, value, expires_at).await
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let client = Arc::clone(&self.client);
        let key = key.to_owned();
        let contents = entry::encode(value, expires_at);
        let ttl = expiration(expires_at, Utc::now());

        tokio::task::spawn_blocking(move || client.set(&key, contents.as_str(), ttl)).await??;
        Ok(true)
    }
}
