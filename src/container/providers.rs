//! Standard service registrations.

use std::convert::Infallible;
use std::sync::Arc;

use tracing::info;

use super::{BoxError, ContainerError, Service, ServiceContainer};
use crate::cache::Cache;
use crate::cache::locker::{Locker, make_locker};
use crate::cache::store::{Store, make_store};
use crate::config::{CacheConfig, ConfigProvider, ConfigurationError, LockerConfig, StoreConfig};

/// `Arc<dyn ConfigProvider>`, singleton.
pub const CONFIG: &str = "config";
/// `Arc<dyn Store>`, singleton.
pub const CACHE_STORE: &str = "cache.store";
/// `Option<Arc<dyn Locker>>`, singleton.
pub const CACHE_LOCKER: &str = "cache.locker";
/// [`Cache`], deferred and built per request.
pub const CACHE: &str = "cache";

/// Binds a group of related services.
pub trait ServiceProvider {
    fn register(&self, container: &ServiceContainer) -> Result<(), ContainerError>;
}

/// Exposes the application's configuration as the `config` service.
#[derive(Debug, Clone)]
pub struct ConfigServiceProvider {
    config: Arc<dyn ConfigProvider>,
}

impl ConfigServiceProvider {
    pub fn new(config: Arc<dyn ConfigProvider>) -> Self {
        Self { config }
    }
}

impl ServiceProvider for ConfigServiceProvider {
    fn register(&self, container: &ServiceContainer) -> Result<(), ContainerError> {
        let config = Arc::clone(&self.config);
        container.bind(
            Service::new(CONFIG, move |_| {
                let config = Arc::clone(&config);
                async move { Ok::<_, Infallible>(config) }
            })
            .singleton(),
        )
    }
}

/// Binds the cache store, the optional locker and the per-request cache.
///
/// The `cache` section is validated when the provider is built, so a bad
/// driver or locker name fails at startup.
#[derive(Debug, Clone)]
pub struct CacheServiceProvider {
    store: StoreConfig,
    locker: Option<LockerConfig>,
}

impl CacheServiceProvider {
    /// # Errors
    ///
    /// Any [`ConfigurationError`] raised by the `cache` section.
    pub fn new(config: &dyn ConfigProvider) -> Result<Self, ConfigurationError> {
        let cache = CacheConfig::load(config)?;
        Ok(Self {
            store: cache.store()?,
            locker: cache.locker()?,
        })
    }

    pub fn store_config(&self) -> &StoreConfig {
        &self.store
    }

    pub fn locker_config(&self) -> Option<&LockerConfig> {
        self.locker.as_ref()
    }
}

impl ServiceProvider for CacheServiceProvider {
    fn register(&self, container: &ServiceContainer) -> Result<(), ContainerError> {
        let store = self.store.clone();
        container.bind(
            Service::new(CACHE_STORE, move |_| {
                let store = store.clone();
                async move { make_store(&store).await }
            })
            .singleton(),
        )?;

        let locker = self.locker.clone();
        container.bind(
            Service::new(CACHE_LOCKER, move |_| {
                let locker = locker.clone();
                async move {
                    let Some(config) = locker else {
                        info!("no cache locker configured");
                        return Ok::<Option<Arc<dyn Locker>>, BoxError>(None);
                    };
                    Ok(Some(make_locker(&config)?))
                }
            })
            .singleton(),
        )?;

        container.bind(
            Service::new(CACHE, |container: ServiceContainer| async move {
                let store = container.make::<Arc<dyn Store>>(CACHE_STORE).await?;
                let locker = container.make::<Option<Arc<dyn Locker>>>(CACHE_LOCKER).await?;
                Ok::<_, ContainerError>(Cache::new(Arc::clone(&store), (*locker).clone()))
            })
            .deferred(),
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::MapConfig;

    fn file_config(dir: &tempfile::TempDir, extra: serde_json::Value) -> Arc<MapConfig> {
        let mut cache = json!({ "driver": "file", "path": dir.path() });
        if let (Some(cache), Some(extra)) = (cache.as_object_mut(), extra.as_object()) {
            cache.extend(extra.clone());
        }
        Arc::new(MapConfig::from_value(json!({ "cache": cache })).unwrap())
    }

    fn container(config: Arc<MapConfig>) -> ServiceContainer {
        let container = ServiceContainer::new();
        container
            .register(&ConfigServiceProvider::new(Arc::clone(&config) as Arc<dyn ConfigProvider>))
            .unwrap();
        container
            .register(&CacheServiceProvider::new(config.as_ref()).unwrap())
            .unwrap();
        container
    }

    #[tokio::test]
    async fn cache_instances_share_store() {
        let dir = tempfile::tempdir().unwrap();
        let container = container(file_config(&dir, json!({})));

        let a = container.make_unique::<Cache>(CACHE).await.unwrap();
        let b = container.make_unique::<Cache>(CACHE).await.unwrap();
        assert!(!a.has_locker());
        assert!(!b.has_locker());

        let first = container.make::<Arc<dyn Store>>(CACHE_STORE).await.unwrap();
        let second = container.make::<Arc<dyn Store>>(CACHE_STORE).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn eager_load_skips_cache_but_builds_backends() {
        let dir = tempfile::tempdir().unwrap();
        let container = container(file_config(&dir, json!({})));

        container.load_eager_services().await.unwrap();
        assert!(container.is_instantiated(CONFIG));
        assert!(container.is_instantiated(CACHE_STORE));
        assert!(container.is_instantiated(CACHE_LOCKER));
        assert!(!container.is_instantiated(CACHE));
    }

    #[tokio::test]
    async fn config_service_returns_provider() {
        let dir = tempfile::tempdir().unwrap();
        let container = container(file_config(&dir, json!({})));

        let config = container
            .make::<Arc<dyn ConfigProvider>>(CONFIG)
            .await
            .unwrap();
        assert!(config.get_section("cache").is_some());
    }

    #[tokio::test]
    async fn configured_locker_is_attached_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir, json!({ "locker": "redis", "port": 1 }));
        let container = container(config);

        let cache = container.make_unique::<Cache>(CACHE).await.unwrap();
        assert!(cache.has_locker());
    }

    #[test]
    fn unknown_driver_fails_before_binding() {
        let config = MapConfig::from_value(json!({ "cache": { "driver": "tape" } })).unwrap();
        assert!(matches!(
            CacheServiceProvider::new(&config),
            Err(ConfigurationError::UnsupportedDriver(ref d)) if d == "tape"
        ));
    }

    #[test]
    fn unknown_locker_fails_before_binding() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir, json!({ "locker": "zookeeper" }));
        assert!(matches!(
            CacheServiceProvider::new(config.as_ref()),
            Err(ConfigurationError::UnsupportedLocker(_))
        ));
    }

    #[test]
    fn missing_section_is_reported() {
        assert!(matches!(
            CacheServiceProvider::new(&MapConfig::new()),
            Err(ConfigurationError::MissingSection(_))
        ));
    }
}
