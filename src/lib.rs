//! # hitgate
//!
//! Request throttling and caching for async HTTP services.
//!
//! - [`cache`]: a [`Cache`] façade over pluggable stores (file, Redis,
//!   memcache) with optional Redlock-based locking.
//! - [`throttle`]: a fixed-window [`RateLimiter`] and the
//!   [`ThrottleMiddleware`] that enforces it per client.
//! - [`container`]: the lazy service container that hands out shared stores
//!   and lockers and a fresh cache per request.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hitgate::config::{MapConfig, ThrottleConfig};
//! use hitgate::container::{CacheServiceProvider, ConfigServiceProvider, ServiceContainer};
//! use hitgate::middleware::{Pipeline, endpoint};
//! use hitgate::throttle::ThrottleMiddleware;
//! use hitgate::{Response, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = Arc::new(MapConfig::from_value(serde_json::json!({
//!         "cache": { "driver": "redis", "host": "127.0.0.1", "locker": "redis" },
//!         "throttle": { "max_hits": 60, "decay": 60 }
//!     }))?);
//!
//!     let container = ServiceContainer::new();
//!     container.register(&ConfigServiceProvider::new(config.clone()))?;
//!     container.register(&CacheServiceProvider::new(config.as_ref())?)?;
//!     container.load_eager_services().await?;
//!
//!     let throttle = ThrottleMiddleware::new(container, ThrottleConfig::load(config.as_ref())?)
//!         .with_locking(true);
//!     let pipeline = Pipeline::new()
//!         .with_middleware(throttle)
//!         .with(endpoint(|_ctx| async { Response::new(StatusCode::Ok).body("hello") }));
//!     # let _ = pipeline;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod container;
pub mod context;
pub mod filesystem;
pub mod hashing;
pub mod http;
pub mod middleware;
pub mod throttle;

pub use cache::{Cache, CacheError};
pub use container::{ContainerError, ServiceContainer};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use throttle::{RateLimitError, RateLimiter, ThrottleMiddleware};
