//! Startup configuration and bootstrap of the rate limiter.

use crate::backend::{InMemoryStore, Store};
use crate::error::ConfigError;
use crate::limiter::{WindowLimiter, DEFAULT_STORE_TIMEOUT};
use crate::policy::RatePolicy;
use crate::sweeper::{Sweeper, DEFAULT_SWEEP_INTERVAL_SECONDS};
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Prefix of the environment variables read by [RateLimitConfig::from_env], e.g.
/// `RATE_LIMIT_REQUESTS_PER_MINUTE`.
pub const ENV_PREFIX: &str = "RATE_LIMIT";

/// Rate limiter settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per client per minute.
    pub requests_per_minute: u64,
    /// Requests allowed per client per hour.
    pub requests_per_hour: u64,
    /// Seconds between sweeps of the in-memory store.
    pub sweep_interval_secs: u64,
    /// Upper bound on a single store round trip, in milliseconds.
    pub store_timeout_ms: u64,
    /// Allow requests while the store is failing.
    pub fail_open: bool,
    /// Share counts between processes through Redis (requires the `redis` feature).
    pub redis_url: Option<String>,
    /// Namespace for keys in Redis.
    pub key_prefix: Option<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 3,
            requests_per_hour: 30,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECONDS,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT.as_millis() as u64,
            fail_open: true,
            redis_url: None,
            key_prefix: Some("tripbrief:ratelimit:".to_owned()),
        }
    }
}

/// A limiter and the background task keeping its store tidy.
///
/// Owned by the server bootstrap; dropping it stops the sweeper.
pub struct RateLimitService {
    pub limiter: WindowLimiter<Store>,
    pub sweeper: Option<Sweeper>,
}

impl RateLimitConfig {
    /// Load from `RATE_LIMIT_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(config::Config::builder())
    }

    /// Load from a configuration file (any format the `config` crate understands), with
    /// `RATE_LIMIT_*` environment variables taking precedence.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(config::Config::builder().add_source(File::with_name(path)))
    }

    fn load(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// The per-minute and per-hour policies, most restrictive first.
    pub fn policies(&self) -> Result<Vec<RatePolicy>, ConfigError> {
        Ok(vec![
            RatePolicy::per_minute(self.requests_per_minute)?,
            RatePolicy::per_hour(self.requests_per_hour)?,
        ])
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Build the limiter described by this configuration.
    ///
    /// Must be called from within an actix runtime, since the sweeper is spawned on it. A Redis
    /// store that can't be reached is replaced by an in-memory one rather than failing startup.
    pub async fn start(&self) -> Result<RateLimitService, ConfigError> {
        let policies = self.policies()?;
        let store = self.connect_store().await;
        let sweeper = if store.needs_sweeping() {
            Some(Sweeper::spawn(store.clone(), self.sweep_interval())?)
        } else {
            None
        };
        let limiter = WindowLimiter::builder(store)
            .policies(policies)
            .store_timeout(self.store_timeout())
            .fail_open(self.fail_open)
            .build()?;
        log::info!(
            "Rate limiting {} requests per minute and {} per hour",
            self.requests_per_minute,
            self.requests_per_hour
        );
        Ok(RateLimitService { limiter, sweeper })
    }

    #[cfg(feature = "redis")]
    async fn connect_store(&self) -> Store {
        use crate::backend::redis::RedisStore;
        use crate::error::StoreError;

        let Some(url) = &self.redis_url else {
            return Store::Memory(InMemoryStore::new());
        };
        let connected = actix_web::rt::time::timeout(self.store_timeout(), RedisStore::connect(url))
            .await
            .unwrap_or_else(|_| Err(StoreError::Timeout(self.store_timeout())));
        match connected {
            Ok(builder) => {
                log::info!("Rate limit counts stored in Redis");
                Store::Redis(builder.key_prefix(self.key_prefix.as_deref()).build())
            }
            Err(e) => {
                log::warn!("Unable to connect to Redis: {e}, rate limit counts are per process");
                Store::Memory(InMemoryStore::new())
            }
        }
    }

    #[cfg(not(feature = "redis"))]
    async fn connect_store(&self) -> Store {
        if self.redis_url.is_some() {
            log::warn!(
                "redis_url is set but the redis feature is disabled, \
                 rate limit counts are per process"
            );
        }
        Store::Memory(InMemoryStore::new())
    }
}
