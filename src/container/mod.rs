//! Lazy service container.
//!
//! Services are registered by name with an async factory. A singleton is
//! built once on first request and shared afterwards; any other service is
//! built fresh on every [`ServiceContainer::make`]. Non-deferred services are
//! built up front by [`ServiceContainer::load_eager_services`].
//!
//! ```rust
//! use std::convert::Infallible;
//! use std::sync::Arc;
//! use hitgate::container::{Service, ServiceContainer};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), hitgate::container::ContainerError> {
//! let container = ServiceContainer::new();
//! container.bind(
//!     Service::new("greeting", |_| async { Ok::<_, Infallible>(String::from("hi")) })
//!         .singleton(),
//! )?;
//!
//! let a = container.make::<String>("greeting").await?;
//! let b = container.make::<String>("greeting").await?;
//! assert!(Arc::ptr_eq(&a, &b));
//! # Ok(())
//! # }
//! ```

use std::any::{Any, type_name};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

mod providers;

pub use self::providers::{
    CACHE, CACHE_LOCKER, CACHE_STORE, CONFIG, CacheServiceProvider, ConfigServiceProvider,
    ServiceProvider,
};

/// Boxed error returned by service factories.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type Instance = Arc<dyn Any + Send + Sync>;
type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type Factory = Arc<dyn Fn(ServiceContainer) -> BoxFuture<Result<Instance, BoxError>> + Send + Sync>;

/// Errors produced by the service container.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("service `{0}` is already bound")]
    AlreadyBound(String),

    #[error("service `{0}` is not bound")]
    NotBound(String),

    #[error("service `{name}` is not a `{expected}`")]
    TypeMismatch {
        name: String,
        expected: &'static str,
    },

    #[error("service `{0}` is shared and cannot be taken by value")]
    SharedInstance(String),

    #[error("failed to create service `{name}`: {source}")]
    Creation {
        name: String,
        #[source]
        source: BoxError,
    },
}

/// A named service registration.
pub struct Service {
    name: String,
    factory: Factory,
    singleton: bool,
    deferred: bool,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("singleton", &self.singleton)
            .field("deferred", &self.deferred)
            .finish_non_exhaustive()
    }
}

impl Service {
    /// Registers `factory` under `name`. The factory receives a handle to the
    /// container so it can resolve its own dependencies.
    pub fn new<T, E, F, Fut>(name: impl Into<String>, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        E: Into<BoxError>,
        F: Fn(ServiceContainer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let factory: Factory = Arc::new(
            move |container: ServiceContainer| -> BoxFuture<Result<Instance, BoxError>> {
                let created = factory(container);
                Box::pin(async move {
                    let service = created.await.map_err(Into::<BoxError>::into)?;
                    Ok::<Instance, BoxError>(Arc::new(service))
                })
            },
        );
        Self {
            name: name.into(),
            factory,
            singleton: false,
            deferred: false,
        }
    }

    /// Builds the service once and shares it.
    #[must_use]
    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    /// Skips the service in [`ServiceContainer::load_eager_services`].
    #[must_use]
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Default)]
struct Inner {
    bindings: DashMap<String, Arc<Service>>,
    order: RwLock<Vec<String>>,
    instances: DashMap<String, Arc<OnceCell<Instance>>>,
}

/// Cheaply cloneable handle to a shared service registry.
#[derive(Clone, Default)]
pub struct ServiceContainer {
    inner: Arc<Inner>,
}

impl fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("services", &self.registration_order())
            .finish()
    }
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service.
    ///
    /// # Errors
    ///
    /// [`ContainerError::AlreadyBound`] if the name is taken.
    pub fn bind(&self, service: Service) -> Result<(), ContainerError> {
        match self.inner.bindings.entry(service.name.clone()) {
            Entry::Occupied(e) => Err(ContainerError::AlreadyBound(e.key().clone())),
            Entry::Vacant(e) => {
                debug!(
                    service = %service.name,
                    singleton = service.singleton,
                    deferred = service.deferred,
                    "service bound"
                );
                self.inner
                    .order
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(service.name.clone());
                e.insert(Arc::new(service));
                Ok(())
            }
        }
    }

    /// Lets `provider` bind its services.
    pub fn register(&self, provider: &dyn ServiceProvider) -> Result<(), ContainerError> {
        provider.register(self)
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.inner.bindings.contains_key(name)
    }

    /// Returns `true` once a singleton has been built.
    pub fn is_instantiated(&self, name: &str) -> bool {
        self.inner
            .instances
            .get(name)
            .is_some_and(|cell| cell.initialized())
    }

    /// Resolves `name` as a `T`.
    ///
    /// Concurrent first requests for a singleton share a single factory call.
    /// A failed factory leaves the singleton unbuilt so a later call retries.
    ///
    /// # Errors
    ///
    /// - [`ContainerError::NotBound`] for an unknown name.
    /// - [`ContainerError::Creation`] when the factory fails.
    /// - [`ContainerError::TypeMismatch`] when the service is not a `T`.
    pub async fn make<T>(&self, name: &str) -> Result<Arc<T>, ContainerError>
    where
        T: Send + Sync + 'static,
    {
        self.resolve(name)
            .await?
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                name: name.to_owned(),
                expected: type_name::<T>(),
            })
    }

    /// Resolves a non-singleton service and takes ownership of it.
    ///
    /// # Errors
    ///
    /// [`ContainerError::SharedInstance`] for singletons, plus the errors of
    /// [`make`](Self::make).
    pub async fn make_unique<T>(&self, name: &str) -> Result<T, ContainerError>
    where
        T: Send + Sync + 'static,
    {
        if self.binding(name)?.singleton {
            return Err(ContainerError::SharedInstance(name.to_owned()));
        }
        Arc::try_unwrap(self.make::<T>(name).await?)
            .map_err(|_| ContainerError::SharedInstance(name.to_owned()))
    }

    /// Builds every non-deferred service in registration order.
    pub async fn load_eager_services(&self) -> Result<(), ContainerError> {
        for name in self.registration_order() {
            if self.binding(&name)?.deferred {
                continue;
            }
            self.resolve(&name).await?;
        }
        Ok(())
    }

    fn registration_order(&self) -> Vec<String> {
        self.inner
            .order
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn binding(&self, name: &str) -> Result<Arc<Service>, ContainerError> {
        self.inner
            .bindings
            .get(name)
            .map(|b| Arc::clone(b.value()))
            .ok_or_else(|| ContainerError::NotBound(name.to_owned()))
    }

    async fn resolve(&self, name: &str) -> Result<Instance, ContainerError> {
        let service = self.binding(name)?;
        if !service.singleton {
            return self.create(&service).await;
        }

        let cell = Arc::clone(self.inner.instances.entry(name.to_owned()).or_default().value());
        let instance = cell.get_or_try_init(|| self.create(&service)).await?;
        Ok(Arc::clone(instance))
    }

    async fn create(&self, service: &Service) -> Result<Instance, ContainerError> {
        let instance = (service.factory)(self.clone()).await.map_err(|source| {
            ContainerError::Creation {
                name: service.name.clone(),
                source,
            }
        })?;
        debug!(service = %service.name, singleton = service.singleton, "service instantiated");
        Ok(instance)
    }
}
