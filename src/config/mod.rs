//! Typed configuration for the cache, locker, and throttling layers.
//!
//! Reading configuration files is the host application's job. This module
//! consumes already-parsed sections through the [`ConfigProvider`] trait and
//! turns the loosely typed `cache` section into per-backend configuration
//! structs, so an unsupported driver or a missing parameter is rejected when a
//! service is bound rather than on first use.
//!
//! ## Recognized `cache` keys
//!
//! | Key                  | Meaning                                             |
//! |----------------------|-----------------------------------------------------|
//! | `driver`             | `file`, `redis`, `asyncredis`, or `memcache`        |
//! | `path`               | cache directory (file driver)                       |
//! | `host`, `port`       | network backend address                             |
//! | `db`, `password`     | Redis database index and password                   |
//! | `locker`             | `asyncredis` / `redis`, or absent for no locker     |
//! | `locker_retry_count` | lock acquisition attempts (default 3)               |

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::throttle::window_length;

/// A parsed configuration section: string keys mapped to JSON values.
pub type Section = Map<String, Value>;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_REDIS_PORT: u16 = 6379;
const DEFAULT_MEMCACHE_PORT: u16 = 11211;
const DEFAULT_LOCKER_RETRY_COUNT: u32 = 3;

/// Errors raised while validating configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("configuration section `{0}` is missing")]
    MissingSection(String),

    #[error("invalid `{section}` configuration: {source}")]
    Invalid {
        section: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported cache driver `{0}`")]
    UnsupportedDriver(String),

    #[error("unsupported cache locker `{0}`")]
    UnsupportedLocker(String),

    #[error("`{section}.{field}` value {value} is out of range")]
    OutOfRange {
        section: String,
        field: &'static str,
        value: u64,
    },

    #[error("cache driver `{driver}` requires `{field}`")]
    MissingField {
        driver: StoreDriver,
        field: &'static str,
    },
}

/// Source of configuration sections.
///
/// Implemented by whatever loads the application's settings; the crate only
/// ever asks for whole sections by name.
pub trait ConfigProvider: Send + Sync + fmt::Debug {
    /// Returns the section called `name`, or `None` if it is not configured.
    fn get_section(&self, name: &str) -> Option<Section>;
}

/// In-memory [`ConfigProvider`] backed by a map of sections.
///
/// # Examples
///
/// ```
/// use hitgate::config::{ConfigProvider, MapConfig};
/// use serde_json::json;
///
/// let config = MapConfig::from_value(json!({
///     "cache": { "driver": "file", "path": "/tmp/cache" }
/// }))
/// .unwrap();
///
/// assert!(config.get_section("cache").is_some());
/// assert!(config.get_section("missing").is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MapConfig {
    sections: HashMap<String, Section>,
}

impl MapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a section.
    #[must_use]
    pub fn with_section(mut self, name: impl Into<String>, section: Section) -> Self {
        self.sections.insert(name.into(), section);
        self
    }

    /// Builds a provider from a JSON object whose members are sections.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::Invalid`] if the value is not an object of objects.
    pub fn from_value(value: Value) -> Result<Self, ConfigurationError> {
        let sections: HashMap<String, Section> =
            serde_json::from_value(value).map_err(|source| ConfigurationError::Invalid {
                section: "<root>".to_owned(),
                source,
            })?;
        Ok(Self { sections })
    }
}

impl ConfigProvider for MapConfig {
    fn get_section(&self, name: &str) -> Option<Section> {
        self.sections.get(name).cloned()
    }
}

/// Store backend selector (`driver` key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreDriver {
    File,
    Redis,
    AsyncRedis,
    Memcache,
}

impl StoreDriver {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Redis => "redis",
            Self::AsyncRedis => "asyncredis",
            Self::Memcache => "memcache",
        }
    }
}

impl fmt::Display for StoreDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StoreDriver {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "redis" => Ok(Self::Redis),
            "asyncredis" => Ok(Self::AsyncRedis),
            "memcache" => Ok(Self::Memcache),
            other => Err(ConfigurationError::UnsupportedDriver(other.to_owned())),
        }
    }
}

/// Raw `cache` section as written by the operator.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub driver: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub db: i64,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub locker: Option<String>,
    #[serde(default = "default_locker_retry_count")]
    pub locker_retry_count: u32,
}

fn default_host() -> String {
    DEFAULT_HOST.to_owned()
}

fn default_locker_retry_count() -> u32 {
    DEFAULT_LOCKER_RETRY_COUNT
}

impl CacheConfig {
    /// Name of the section this struct is read from.
    pub const SECTION: &'static str = "cache";

    /// Deserializes a `cache` section.
    pub fn from_section(section: Section) -> Result<Self, ConfigurationError> {
        serde_json::from_value(Value::Object(section)).map_err(|source| {
            ConfigurationError::Invalid {
                section: Self::SECTION.to_owned(),
                source,
            }
        })
    }

    /// Reads and deserializes the `cache` section from `provider`.
    pub fn load(provider: &dyn ConfigProvider) -> Result<Self, ConfigurationError> {
        let section = provider
            .get_section(Self::SECTION)
            .ok_or_else(|| ConfigurationError::MissingSection(Self::SECTION.to_owned()))?;
        Self::from_section(section)
    }

    /// Validates the driver and its parameters.
    ///
    /// # Errors
    ///
    /// - [`ConfigurationError::UnsupportedDriver`] for an unknown `driver`.
    /// - [`ConfigurationError::MissingField`] when the file driver has no `path`.
    pub fn store(&self) -> Result<StoreConfig, ConfigurationError> {
        let driver: StoreDriver = self.driver.parse()?;
        Ok(match driver {
            StoreDriver::File => {
                let directory = self.path.clone().ok_or(ConfigurationError::MissingField {
                    driver,
                    field: "path",
                })?;
                StoreConfig::File(FileStoreConfig { directory })
            }
            StoreDriver::Redis => StoreConfig::Redis(self.redis()),
            StoreDriver::AsyncRedis => StoreConfig::AsyncRedis(self.redis()),
            StoreDriver::Memcache => StoreConfig::Memcache(MemcacheConfig {
                host: self.host.clone(),
                port: self.port.unwrap_or(DEFAULT_MEMCACHE_PORT),
            }),
        })
    }

    /// Validates the `locker` selector.
    ///
    /// Returns `Ok(None)` when no locker is configured.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::UnsupportedLocker`] for an unknown selector.
    pub fn locker(&self) -> Result<Option<LockerConfig>, ConfigurationError> {
        match self.locker.as_deref() {
            None | Some("") => Ok(None),
            Some("asyncredis" | "redis") => Ok(Some(LockerConfig {
                nodes: vec![self.redis()],
                retry_count: self.locker_retry_count,
            })),
            Some(other) => Err(ConfigurationError::UnsupportedLocker(other.to_owned())),
        }
    }

    fn redis(&self) -> RedisConfig {
        RedisConfig {
            host: self.host.clone(),
            port: self.port.unwrap_or(DEFAULT_REDIS_PORT),
            db: self.db,
            password: self.password.clone(),
        }
    }
}

/// Validated store configuration, one variant per backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    File(FileStoreConfig),
    Redis(RedisConfig),
    AsyncRedis(RedisConfig),
    Memcache(MemcacheConfig),
}

impl StoreConfig {
    pub fn driver(&self) -> StoreDriver {
        match self {
            Self::File(_) => StoreDriver::File,
            Self::Redis(_) => StoreDriver::Redis,
            Self::AsyncRedis(_) => StoreDriver::AsyncRedis,
            Self::Memcache(_) => StoreDriver::Memcache,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStoreConfig {
    pub directory: PathBuf,
}

/// Connection parameters for one Redis server.
#[derive(Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
}

impl RedisConfig {
    /// Connection parameters for [`redis::Client::open`].
    ///
    /// Built field by field so passwords never pass through URL parsing.
    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: self.db,
                password: self.password.clone(),
                ..RedisConnectionInfo::default()
            },
        }
    }
}

// Keeps the password out of logs.
impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemcacheConfig {
    pub host: String,
    pub port: u16,
}

impl MemcacheConfig {
    pub fn url(&self) -> String {
        format!("memcache://{}:{}", self.host, self.port)
    }
}

/// Validated locker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockerConfig {
    /// Independent Redis nodes taking part in the lock quorum.
    pub nodes: Vec<RedisConfig>,
    /// Acquisition attempts before giving up.
    pub retry_count: u32,
}

/// Quota settings for the throttling middleware (`throttle` section).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ThrottleConfig {
    /// Requests allowed per window.
    #[serde(default = "default_max_hits")]
    pub max_hits: u64,
    /// Window length in seconds.
    #[serde(default = "default_decay")]
    pub decay: u64,
}

fn default_max_hits() -> u64 {
    60
}

fn default_decay() -> u64 {
    60
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_hits: default_max_hits(),
            decay: default_decay(),
        }
    }
}

impl ThrottleConfig {
    pub const SECTION: &'static str = "throttle";

    /// Reads the `throttle` section, falling back to defaults when absent.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::OutOfRange`] when `decay` is too long for a
    /// window to end at a representable time.
    pub fn load(provider: &dyn ConfigProvider) -> Result<Self, ConfigurationError> {
        let config: Self = match provider.get_section(Self::SECTION) {
            None => Self::default(),
            Some(section) => serde_json::from_value(Value::Object(section)).map_err(|source| {
                ConfigurationError::Invalid {
                    section: Self::SECTION.to_owned(),
                    source,
                }
            })?,
        };
        if window_length(config.decay).is_none() {
            return Err(ConfigurationError::OutOfRange {
                section: Self::SECTION.to_owned(),
                field: "decay",
                value: config.decay,
            });
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache_config(value: Value) -> CacheConfig {
        let config = MapConfig::from_value(json!({ "cache": value })).unwrap();
        CacheConfig::load(&config).unwrap()
    }

    #[test]
    fn file_driver_requires_path() {
        let config = cache_config(json!({ "driver": "file" }));
        assert!(matches!(
            config.store(),
            Err(ConfigurationError::MissingField { driver: StoreDriver::File, field: "path" })
        ));

        let config = cache_config(json!({ "driver": "file", "path": "/var/cache/app" }));
        assert_eq!(
            config.store().unwrap(),
            StoreConfig::File(FileStoreConfig {
                directory: PathBuf::from("/var/cache/app")
            })
        );
    }

    #[test]
    fn unknown_driver_is_rejected() {
        let config = cache_config(json!({ "driver": "dynamo" }));
        assert!(matches!(
            config.store(),
            Err(ConfigurationError::UnsupportedDriver(d)) if d == "dynamo"
        ));
    }

    #[test]
    fn network_defaults_depend_on_driver() {
        let redis = cache_config(json!({ "driver": "asyncredis" }));
        match redis.store().unwrap() {
            StoreConfig::AsyncRedis(c) => {
                assert_eq!(c.host, "127.0.0.1");
                assert_eq!(c.port, 6379);
                assert_eq!(c.db, 0);
            }
            other => panic!("expected AsyncRedis, got {other:?}"),
        }

        let memcache = cache_config(json!({ "driver": "memcache", "host": "mc" }));
        assert_eq!(
            memcache.store().unwrap(),
            StoreConfig::Memcache(MemcacheConfig {
                host: "mc".to_owned(),
                port: 11211
            })
        );
    }

    #[test]
    fn redis_connection_info_carries_password_and_db() {
        let config = RedisConfig {
            host: "cache.internal".to_owned(),
            port: 6380,
            db: 2,
            password: Some("s3cret".to_owned()),
        };
        let info = config.connection_info();
        assert!(matches!(&info.addr, ConnectionAddr::Tcp(host, 6380) if host == "cache.internal"));
        assert_eq!(info.redis.db, 2);
        assert_eq!(info.redis.password.as_deref(), Some("s3cret"));
        assert!(!format!("{config:?}").contains("s3cret"));
    }

    #[test]
    fn redis_password_with_url_delimiters_is_kept_verbatim() {
        let config = RedisConfig {
            host: "cache.internal".to_owned(),
            port: 6379,
            db: 0,
            password: Some("p@ss:w/rd#1".to_owned()),
        };
        let client = redis::Client::open(config.connection_info()).unwrap();
        let info = client.get_connection_info();
        assert!(matches!(&info.addr, ConnectionAddr::Tcp(host, 6379) if host == "cache.internal"));
        assert_eq!(info.redis.password.as_deref(), Some("p@ss:w/rd#1"));
    }

    #[test]
    fn locker_selector() {
        let none = cache_config(json!({ "driver": "file", "path": "/tmp" }));
        assert_eq!(none.locker().unwrap(), None);

        let redlock = cache_config(json!({
            "driver": "redis",
            "locker": "asyncredis",
            "locker_retry_count": 5
        }));
        let locker = redlock.locker().unwrap().unwrap();
        assert_eq!(locker.retry_count, 5);
        assert_eq!(locker.nodes.len(), 1);

        let bad = cache_config(json!({ "driver": "redis", "locker": "zookeeper" }));
        assert!(matches!(
            bad.locker(),
            Err(ConfigurationError::UnsupportedLocker(l)) if l == "zookeeper"
        ));
    }

    #[test]
    fn missing_cache_section() {
        let config = MapConfig::new();
        assert!(matches!(
            CacheConfig::load(&config),
            Err(ConfigurationError::MissingSection(s)) if s == "cache"
        ));
    }

    #[test]
    fn throttle_defaults_and_overrides() {
        assert_eq!(
            ThrottleConfig::load(&MapConfig::new()).unwrap(),
            ThrottleConfig { max_hits: 60, decay: 60 }
        );

        let config = MapConfig::from_value(json!({ "throttle": { "max_hits": 5 } })).unwrap();
        assert_eq!(
            ThrottleConfig::load(&config).unwrap(),
            ThrottleConfig { max_hits: 5, decay: 60 }
        );
    }

    #[test]
    fn throttle_decay_must_fit_a_timestamp() {
        let config =
            MapConfig::from_value(json!({ "throttle": { "decay": u64::MAX } })).unwrap();
        assert!(matches!(
            ThrottleConfig::load(&config),
            Err(ConfigurationError::OutOfRange { field: "decay", value: u64::MAX, .. })
        ));
    }
}
