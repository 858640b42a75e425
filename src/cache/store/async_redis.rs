use std::fmt;

use ::redis::aio::ConnectionManager;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Store, StoreError, add_if_vacant};
use crate::cache::entry::{self, Payload};
use crate::config::RedisConfig;

/// Redis store on the async multiplexed connection.
///
/// Writes are a `SET` followed by `EXPIREAT` with the absolute unix
/// timestamp of the expiry, unlike [`RedisStore`](super::RedisStore) which
/// sends a relative TTL.
#[derive(Clone)]
pub struct AsyncRedisStore {
    conn: ConnectionManager,
}

impl fmt::Debug for AsyncRedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncRedisStore").finish_non_exhaustive()
    }
}

impl AsyncRedisStore {
    /// Connects to the server; reconnection afterwards is automatic.
    ///
    /// # Errors
    ///
    /// [`StoreError::Redis`] if the parameters are rejected or the server is unreachable.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(config.connection_info())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Store for AsyncRedisStore {
    async fn get(&self, key: &str) -> Result<Option<Payload>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = ::redis::cmd("GET").arg(key).query_async(&mut conn).await?;

        let contents = raw
            .map(String::from_utf8)
            .transpose()
            .map_err(entry::DecodeError::from)?;
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
        let mut conn = self.conn.clone();
        let contents = entry::encode(value, expires_at);

        let () = ::redis::cmd("SET")
            .arg(key)
            .arg(contents)
            .query_async(&mut conn)
            .await?;
        let _: i64 = ::redis::cmd("EXPIREAT")
            .arg(key)
            .arg(expires_at.timestamp())
            .query_async(&mut conn)
            .await?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    #[ignore = "requires a Redis server on 127.0.0.1:6379"]
    async fn round_trip_against_live_server() {
        let config = RedisConfig {
            host: "127.0.0.1".to_owned(),
            port: 6379,
            db: 0,
            password: None,
        };
        let store = AsyncRedisStore::connect(&config).await.unwrap();
        let key = format!("hitgate-test-{}", uuid::Uuid::new_v4());
        let t = Utc::now() + Duration::seconds(30);

        assert!(store.add(&key, "first", t).await.unwrap());
        assert!(!store.add(&key, "second", t).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some(Payload::new("first", t)));

        assert!(store.put(&key, "third", t).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap().unwrap().data, "third");
    }
}
