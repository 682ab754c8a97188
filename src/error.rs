use actix_web::http::header::{HeaderValue, RETRY_AFTER};
use actix_web::http::StatusCode;
use actix_web::rt::time::Instant;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::middleware::builder::X_RATELIMIT_REMAINING;

/// Failure of a [WindowStore](crate::backend::WindowStore).
///
/// The limiter never propagates these to the caller; they are logged and turned into a fail-open
/// (or fail-closed) decision.
#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(
        #[source]
        #[from]
        redis::RedisError,
    ),
    #[error("Unexpected negative TTL response for the rate limit key")]
    NegativeTtl,
    #[error("Rate limit store did not respond within {0:?}")]
    Timeout(Duration),
    #[error("Rate limit interval {0:?} is too large")]
    IntervalOverflow(Duration),
    #[error("Rate limit store unavailable: {0}")]
    Unavailable(String),
}

/// Invalid rate limit configuration, reported once at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Policy '{0}' must allow at least one request per window")]
    ZeroMaxRequests(String),
    #[error("Policy '{0}' must have a non-zero window")]
    ZeroInterval(String),
    #[error("At least one rate limit policy is required")]
    NoPolicies,
    #[error("Two policies share the key suffix '{0}'")]
    DuplicateKeySuffix(String),
    #[error("Sweep interval must be non-zero")]
    ZeroSweepInterval,
    #[error("Unable to load rate limit configuration: {0}")]
    Load(
        #[source]
        #[from]
        config::ConfigError,
    ),
}

/// A request that must not proceed to the gated work.
#[derive(Debug, Clone, Error)]
pub enum Rejection {
    #[error("{message}")]
    LimitExceeded {
        /// Name of the violated policy.
        policy: String,
        /// User facing explanation.
        message: String,
        /// When the violated window expires.
        reset: Instant,
        remaining: u64,
    },
    #[error("Rate limiting is temporarily unavailable. Please try again shortly.")]
    StoreUnavailable { reset: Instant },
}

impl Rejection {
    pub fn reset(&self) -> Instant {
        match self {
            Rejection::LimitExceeded { reset, .. } | Rejection::StoreUnavailable { reset } => {
                *reset
            }
        }
    }

    /// Seconds until the client may retry, rounded upwards.
    pub fn retry_after(&self) -> u64 {
        seconds_until(self.reset())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RejectionBody {
    error: String,
    reset_time: u128,
}

impl ResponseError for Rejection {
    fn status_code(&self) -> StatusCode {
        match self {
            Rejection::LimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Rejection::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code()).json(RejectionBody {
            error: self.to_string(),
            reset_time: epoch_millis(self.reset()),
        });
        let map = response.headers_mut();
        map.insert(RETRY_AFTER, HeaderValue::from(self.retry_after()));
        if let Rejection::LimitExceeded { remaining, .. } = self {
            map.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(*remaining));
        }
        response
    }
}

pub(crate) fn seconds_until(reset: Instant) -> u64 {
    let millis = reset.saturating_duration_since(Instant::now()).as_millis() as f64;
    (millis / 1000f64).ceil() as u64
}

/// Wall clock milliseconds since the epoch at which `reset` falls.
pub(crate) fn epoch_millis(reset: Instant) -> u128 {
    let until = reset.saturating_duration_since(Instant::now());
    (SystemTime::now() + until)
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn test_retry_after_rounds_up() {
        tokio::time::pause();
        let rejection = Rejection::LimitExceeded {
            policy: "minute".to_string(),
            message: "slow down".to_string(),
            reset: Instant::now() + Duration::from_secs(60),
            remaining: 0,
        };
        tokio::time::advance(Duration::from_secs_f64(29.9)).await;
        // Verify rounded upwards from 30.1
        assert_eq!(rejection.retry_after(), 31);
    }

    #[actix_web::test]
    async fn test_status_codes() {
        let reset = Instant::now();
        let exceeded = Rejection::LimitExceeded {
            policy: "hour".to_string(),
            message: "later".to_string(),
            reset,
            remaining: 0,
        };
        assert_eq!(exceeded.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(exceeded.to_string(), "later");
        let unavailable = Rejection::StoreUnavailable { reset };
        assert_eq!(unavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn test_error_response_headers() {
        tokio::time::pause();
        let rejection = Rejection::LimitExceeded {
            policy: "minute".to_string(),
            message: "slow down".to_string(),
            reset: Instant::now() + Duration::from_secs(42),
            remaining: 0,
        };
        let response = rejection.error_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "42");
        assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), "0");
    }
}
