//! Middleware pipeline.
//!
//! Each layer receives the request [`Context`] and a [`Next`] cursor. It can
//! forward the request with [`Next::run`], answer it directly, or decorate
//! the response that comes back.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait for layers implemented as types, such as
//!   [`ThrottleMiddleware`](crate::throttle::ThrottleMiddleware).
//! - [`MiddlewareHandler`]: the type-erased form every layer is stored as.
//! - [`Next`]: cursor over the layers that have not run yet.
//! - [`Pipeline`]: an ordered stack of layers, outermost first.
//! - [`endpoint`]: adapts the final request handler into a layer.
//!
//! ```rust
//! use std::sync::Arc;
//! use hitgate::context::Context;
//! use hitgate::http::{Request, Response, StatusCode};
//! use hitgate::middleware::{MiddlewareHandler, Next, Pipeline, ResponseFuture, endpoint};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let tag: MiddlewareHandler = Arc::new(|ctx: Context, next: Next| -> ResponseFuture {
//!     Box::pin(async move {
//!         let mut response = next.run(ctx).await;
//!         response.set_header("X-Tagged", "yes");
//!         response
//!     })
//! });
//! let pipeline = Pipeline::new()
//!     .with(tag)
//!     .with(endpoint(|_ctx| async { Response::new(StatusCode::Ok) }));
//!
//! let (request, _) = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
//! let response = pipeline.handle(Context::new(request)).await;
//! assert_eq!(response.headers().get("x-tagged"), Some("yes"));
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::http::{Response, StatusCode};

/// Boxed future produced by every pipeline layer.
///
/// It must be `Send` so a pipeline can be driven from any worker thread of a
/// multi-threaded runtime.
pub type ResponseFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A type-erased pipeline layer.
///
/// The [`Arc`] makes handlers cheap to clone, so [`Next`] can hand the same
/// layer to many concurrent requests. Build one with [`from_middleware`],
/// [`endpoint`], or by wrapping a closure directly:
///
/// ```rust
/// use std::sync::Arc;
/// use hitgate::context::Context;
/// use hitgate::middleware::{MiddlewareHandler, Next, ResponseFuture};
///
/// let pass_through: MiddlewareHandler = Arc::new(|ctx: Context, next: Next| -> ResponseFuture {
///     Box::pin(async move { next.run(ctx).await })
/// });
/// ```
pub type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> ResponseFuture + Send + Sync + 'static>;

/// A pipeline layer implemented as a type.
///
/// An implementation may:
///
/// - **pass through** by returning `next.run(ctx).await` untouched;
/// - **short-circuit** by answering without calling `next`;
/// - **decorate** by awaiting `next.run(ctx)` and editing the response.
///
/// Implementations are shared across requests and must not hold `&mut`
/// state across an `.await`.
///
/// # Examples
///
/// ```rust
/// use hitgate::context::Context;
/// use hitgate::http::{Response, StatusCode};
/// use hitgate::middleware::{Middleware, Next, ResponseFuture};
///
/// struct Maintenance;
///
/// impl Middleware for Maintenance {
///     fn handle(&self, _ctx: Context, _next: Next) -> ResponseFuture {
///         Box::pin(async { Response::new(StatusCode::ServiceUnavailable) })
///     }
/// }
/// ```
pub trait Middleware: Send + Sync {
    /// Handles the request, optionally delegating to the rest of the chain.
    ///
    /// `ctx` carries the parsed request, the peer address and any extensions
    /// added by outer layers.
    fn handle(&self, ctx: Context, next: Next) -> ResponseFuture;
}

/// Wraps a [`Middleware`] as a [`MiddlewareHandler`].
///
/// [`Pipeline::with_middleware`] does this for you; call it directly when
/// the same instance must sit in several pipelines.
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// Turns a final request handler into the innermost pipeline layer.
///
/// The handler never sees [`Next`]; anything registered after an endpoint
/// is unreachable.
pub fn endpoint<F, Fut>(handler: F) -> MiddlewareHandler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |ctx: Context, _next: Next| Box::pin(handler(ctx)) as ResponseFuture)
}

/// Cursor over the layers that have not run yet.
///
/// `Next` is consumed by [`run`](Self::run), so a layer can forward a request
/// at most once.
pub struct Next {
    layers: Arc<[MiddlewareHandler]>,
    index: usize,
}

impl Next {
    /// Positions a cursor at the first of `layers`.
    pub fn new(layers: impl Into<Arc<[MiddlewareHandler]>>) -> Self {
        Self {
            layers: layers.into(),
            index: 0,
        }
    }

    /// Runs the next layer.
    ///
    /// Answers `500 Internal Server Error` when the chain runs out without any
    /// layer producing a response.
    pub async fn run(mut self, ctx: Context) -> Response {
        let Some(layer) = self.layers.get(self.index).cloned() else {
            return Response::new(StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline");
        };
        self.index += 1;
        layer(ctx, self).await
    }
}

/// An ordered stack of layers, outermost first.
///
/// Cloning a pipeline clones the handler list, not the layers themselves.
#[derive(Clone, Default)]
pub struct Pipeline {
    layers: Vec<MiddlewareHandler>,
}

impl Pipeline {
    /// Creates an empty pipeline. Handling a request with it answers `500`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer inside the ones already added.
    #[must_use]
    pub fn with(mut self, layer: MiddlewareHandler) -> Self {
        self.layers.push(layer);
        self
    }

    /// Appends a [`Middleware`] value inside the layers already added.
    #[must_use]
    pub fn with_middleware<M: Middleware + 'static>(self, middleware: M) -> Self {
        self.with(from_middleware(Arc::new(middleware)))
    }

    /// Sends `ctx` through every layer.
    pub async fn handle(&self, ctx: Context) -> Response {
        Next::new(self.layers.clone()).run(ctx).await
    }
}
