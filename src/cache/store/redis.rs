use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Store, StoreError, add_if_vacant, ttl_seconds};
use crate::cache::entry::{self, Payload};
use crate::config::RedisConfig;

type Pool = r2d2::Pool<::redis::Client>;

/// Redis store driven by the blocking client.
///
/// Commands run on tokio's blocking pool over an `r2d2` connection pool. The
/// TTL is sent as relative seconds (`SET key value EX n`), rounded up so a
/// key never expires before its payload says it should.
#[derive(Debug, Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Builds the connection pool. Connections are opened lazily on first use.
    ///
    /// # Errors
    ///
    /// [`StoreError::Redis`] if the connection parameters are rejected.
    pub fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(config.connection_info())?;
        let pool = r2d2::Pool::builder().build_unchecked(client);
        Ok(Self { pool })
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let pool = self.pool.clone();
        let key = key.to_owned();
        let contents = entry::encode(value, expires_at);
        let ttl = ttl_seconds(expires_at, Utc::now());

        tokio::task::spawn_blocking(move || -> Result<bool, StoreError> {
            let mut conn = pool.get()?;
            let () = ::redis::cmd("SET")
                .arg(&key)
                .arg(&contents)
                .arg("EX")
                .arg(ttl)
                .query(&mut *conn)?;
            Ok(true)
        })
        .await?
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Payload>, StoreError> {
        let pool = self.pool.clone();
        let key = key.to_owned();

        let raw = tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>, StoreError> {
            let mut conn = pool.get()?;
            Ok(::redis::cmd("GET").arg(&key).query(&mut *conn)?)
        })
        .await??;

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
        self.set(key, value, expires_at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn local() -> RedisConfig {
        RedisConfig {
            host: "127.0.0.1".to_owned(),
            port: 6379,
            db: 0,
            password: None,
        }
    }

    #[tokio::test]
    #[ignore = "requires a Redis server on 127.0.0.1:6379"]
    async fn round_trip_against_live_server() {
        let store = RedisStore::connect(&local()).unwrap();
        let key = format!("hitgate-test-{}", uuid::Uuid::new_v4());
        let t = Utc::now() + Duration::seconds(30);

        assert!(store.put(&key, "v", t).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some(Payload::new("v", t)));
        assert!(!store.add(&key, "other", t).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap().unwrap().data, "v");
    }
}
