//! Per-client rate limiting for the TripBrief API.
//!
//! A [WindowLimiter] applies an ordered set of fixed window [RatePolicy] limits (by default 3 per
//! minute and 30 per hour) to a client identifier, counting requests in a [WindowStore]. The
//! [RateLimiter] middleware resolves the identifier from forwarding headers and answers denied
//! requests with `429 Too Many Requests` before they reach the handlers that call the LLM.
//!
//! ```no_run
//! use actix_web::{App, HttpServer};
//! use tripbrief_rate_limit::{RateLimitConfig, RateLimiter};
//!
//! #[actix_web::main]
//! async fn main() -> std::io::Result<()> {
//!     let config = RateLimitConfig::from_env().expect("invalid rate limit configuration");
//!     // Keep `service` alive for as long as the server runs, it owns the sweeper
//!     let service = config.start().await.expect("invalid rate limit configuration");
//!     let limiter = service.limiter.clone();
//!     HttpServer::new(move || {
//!         App::new().wrap(RateLimiter::builder(limiter.clone()).add_headers().build())
//!     })
//!     .bind(("127.0.0.1", 8080))?
//!     .run()
//!     .await
//! }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod backend;
mod error;
pub mod identity;
mod limiter;
mod middleware;
mod policy;
mod settings;
mod sweeper;

pub use backend::{InMemoryStore, Store, WindowEntry, WindowStore};
pub use error::{ConfigError, Rejection, StoreError};
pub use identity::{client_identifier, UNKNOWN_CLIENT};
pub use limiter::{
    Decision, FailureReason, RateLimitDecision, WindowLimiter, WindowLimiterBuilder,
    DEFAULT_STORE_TIMEOUT, FAIL_OPEN_REMAINING, FAIL_OPEN_RESET,
};
pub use middleware::builder::{
    RateLimiterBuilder, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use middleware::{RateLimiter, RateLimiterMiddleware};
pub use policy::RatePolicy;
pub use settings::{RateLimitConfig, RateLimitService, ENV_PREFIX};
pub use sweeper::{Sweeper, DEFAULT_SWEEP_INTERVAL_SECONDS};
