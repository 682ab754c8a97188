use crate::backend::WindowStore;
use crate::identity::client_identifier;
use crate::limiter::{RateLimitDecision, WindowLimiter};
use crate::middleware::{AllowedTransformation, DeniedResponse, IdentityFn, RateLimiter};
use actix_web::dev::ServiceRequest;
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use actix_web::{HttpResponse, ResponseError};
use once_cell::sync::Lazy;
use std::rc::Rc;

pub static X_RATELIMIT_LIMIT: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-limit"));

pub static X_RATELIMIT_REMAINING: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-remaining"));

pub static X_RATELIMIT_RESET: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-reset"));

pub struct RateLimiterBuilder<St> {
    limiter: WindowLimiter<St>,
    identity_fn: Rc<IdentityFn>,
    allowed_transformation: Option<Rc<AllowedTransformation>>,
    denied_response: Rc<DeniedResponse>,
}

impl<St> RateLimiterBuilder<St>
where
    St: WindowStore + 'static,
{
    pub(super) fn new(limiter: WindowLimiter<St>) -> Self {
        Self {
            limiter,
            identity_fn: Rc::new(|req: &ServiceRequest| client_identifier(req.headers())),
            allowed_transformation: None,
            denied_response: Rc::new(default_denied_response),
        }
    }

    /// Derive the client identifier some other way than from the forwarding headers.
    ///
    /// Defaults to [client_identifier].
    pub fn identity_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&ServiceRequest) -> String + 'static,
    {
        self.identity_fn = Rc::new(f);
        self
    }

    /// Sets the [RateLimiterBuilder::request_allowed_transformation] and
    /// [RateLimiterBuilder::request_denied_response] functions, such that the following headers
    /// are set in both the allowed and denied responses:
    ///
    /// - `x-ratelimit-limit`\
    /// - `x-ratelimit-remaining`\
    /// - `x-ratelimit-reset` (seconds until the reset)
    /// - `retry-after` (denied only, seconds until the reset)
    pub fn add_headers(mut self) -> Self {
        self.allowed_transformation = Some(Rc::new(insert_headers));
        self.denied_response = Rc::new(|decision: &RateLimitDecision| {
            let mut response = default_denied_response(decision);
            insert_headers(response.headers_mut(), decision);
            response
        });
        self
    }

    /// In the event that the request is allowed:
    ///
    /// You can optionally mutate the response headers to include the rate limit status.
    ///
    /// By default no changes are made to the response.
    pub fn request_allowed_transformation<M>(mut self, mutation: Option<M>) -> Self
    where
        M: Fn(&mut HeaderMap, &RateLimitDecision) + 'static,
    {
        self.allowed_transformation = mutation.map(|m| Rc::new(m) as Rc<AllowedTransformation>);
        self
    }

    /// In the event that the request is denied, configure the [HttpResponse] returned.
    ///
    /// Defaults to the [Rejection](crate::Rejection) response: status 429 (or 503 if the store
    /// failed closed) with a JSON body `{"error": <message>, "resetTime": <epoch millis>}` and a
    /// `retry-after` header.
    pub fn request_denied_response<R>(mut self, denied_response: R) -> Self
    where
        R: Fn(&RateLimitDecision) -> HttpResponse + 'static,
    {
        self.denied_response = Rc::new(denied_response);
        self
    }

    pub fn build(self) -> RateLimiter<St> {
        RateLimiter {
            limiter: self.limiter,
            identity_fn: self.identity_fn,
            allowed_transformation: self.allowed_transformation,
            denied_response: self.denied_response,
        }
    }
}

fn insert_headers(map: &mut HeaderMap, decision: &RateLimitDecision) {
    map.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(decision.limit));
    map.insert(
        X_RATELIMIT_REMAINING.clone(),
        HeaderValue::from(decision.remaining),
    );
    map.insert(
        X_RATELIMIT_RESET.clone(),
        HeaderValue::from(decision.seconds_until_reset()),
    );
}

fn default_denied_response(decision: &RateLimitDecision) -> HttpResponse {
    match decision.clone().into_result() {
        Err(rejection) => rejection.error_response(),
        // Only reachable with a hand-built decision
        Ok(_) => HttpResponse::TooManyRequests().finish(),
    }
}
