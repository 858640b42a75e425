use tracing::{debug, error};

use super::{RateLimitError, RateLimiter};
use crate::cache::Cache;
use crate::config::ThrottleConfig;
use crate::container::{BoxError, CACHE, ServiceContainer};
use crate::context::Context;
use crate::hashing::Hasher;
use crate::http::{Response, StatusCode};
use crate::middleware::{Middleware, Next, ResponseFuture};

pub const LIMIT_HEADER: &str = "X-RateLimit-Limit";
pub const REMAINING_HEADER: &str = "X-RateLimit-Remaining";
pub const RESET_HEADER: &str = "X-RateLimit-Reset";

const REJECTED_BODY: &str = "Too many requests.";
const FAILED_BODY: &str = "Internal server error";

/// Quota state of the current request, available to downstream handlers
/// through the context extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub remaining: u64,
    /// Seconds until the window resets, when one is open.
    pub reset_in: Option<u64>,
}

impl RateLimitStatus {
    fn of(limiter: &RateLimiter) -> Result<Self, RateLimitError> {
        Ok(Self {
            limit: limiter.max_hits(),
            remaining: limiter.remaining_hits()?,
            reset_in: limiter.window_open().then(|| limiter.available_in()),
        })
    }

    /// Writes the `X-RateLimit-*` headers onto `response`.
    pub fn apply(&self, response: &mut Response) {
        response.set_header(LIMIT_HEADER, self.limit.to_string());
        response.set_header(REMAINING_HEADER, self.remaining.to_string());
        if let Some(reset_in) = self.reset_in {
            response.set_header(RESET_HEADER, reset_in.to_string());
        }
    }
}

/// Limits each client to `max_hits` requests per `decay` seconds.
///
/// Clients are told apart by the SHA-1 of the `Host` header and the peer IP.
/// A per-request [`Cache`] is taken from the container's `cache` service.
///
/// ```rust,no_run
/// use hitgate::config::ThrottleConfig;
/// use hitgate::container::ServiceContainer;
/// use hitgate::middleware::Pipeline;
/// use hitgate::throttle::ThrottleMiddleware;
///
/// # fn example(container: ServiceContainer) {
/// let throttle = ThrottleMiddleware::new(container, ThrottleConfig { max_hits: 100, decay: 60 })
///     .with_locking(true);
/// let pipeline = Pipeline::new().with_middleware(throttle);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ThrottleMiddleware {
    container: ServiceContainer,
    config: ThrottleConfig,
    locking: bool,
}

impl ThrottleMiddleware {
    pub fn new(container: ServiceContainer, config: ThrottleConfig) -> Self {
        Self {
            container,
            config,
            locking: false,
        }
    }

    /// Counts hits under the cache lock. Requires a configured locker.
    #[must_use]
    pub fn with_locking(mut self, locking: bool) -> Self {
        self.locking = locking;
        self
    }

    /// Key identifying the client that sent the request.
    pub fn signature(ctx: &Context) -> String {
        let host = ctx.request().host().unwrap_or_default();
        let ip = ctx
            .peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default();
        Hasher::Sha1.hash(&format!("{host}|{ip}"))
    }

    async fn throttle(self, mut ctx: Context, next: Next) -> Response {
        let key = Self::signature(&ctx);

        let mut limiter = match self.limiter(&key).await {
            Ok(limiter) => limiter,
            Err(e) => {
                error!(key = %key, error = %e, "rate limiter unavailable");
                return failed();
            }
        };

        let hit = if self.locking {
            limiter.hit_secured().await
        } else {
            limiter.hit().await
        };

        let status = match hit.and_then(|_| RateLimitStatus::of(&limiter)) {
            Ok(status) => status,
            Err(RateLimitError::Exceeded { max_hits, available_in }) => {
                debug!(
                    key = %key,
                    method = %ctx.request().method(),
                    path = ctx.request().path(),
                    max_hits,
                    available_in,
                    "request throttled"
                );
                let mut response = Response::new(StatusCode::TooManyRequests).body(REJECTED_BODY);
                RateLimitStatus {
                    limit: max_hits,
                    remaining: 0,
                    reset_in: Some(available_in),
                }
                .apply(&mut response);
                return response;
            }
            Err(e) => {
                error!(key = %key, error = %e, "rate limiting failed");
                return failed();
            }
        };

        ctx.extensions_mut().insert(status);
        let mut response = next.run(ctx).await;
        status.apply(&mut response);
        response
    }

    async fn limiter(&self, key: &str) -> Result<RateLimiter, BoxError> {
        let cache = self.container.make_unique::<Cache>(CACHE).await?;
        Ok(RateLimiter::load(cache, key, self.config.max_hits, self.config.decay).await?)
    }
}

impl Middleware for ThrottleMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> ResponseFuture {
        Box::pin(self.clone().throttle(ctx, next))
    }
}

fn failed() -> Response {
    Response::new(StatusCode::InternalServerError).body(FAILED_BODY)
}
