pub mod builder;

use crate::backend::WindowStore;
use crate::limiter::{RateLimitDecision, WindowLimiter};
use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::HeaderMap;
use actix_web::HttpResponse;
use builder::RateLimiterBuilder;
use futures::future::{ok, LocalBoxFuture, Ready};
use std::cell::RefCell;
use std::rc::Rc;

type IdentityFn = dyn Fn(&ServiceRequest) -> String;
type AllowedTransformation = dyn Fn(&mut HeaderMap, &RateLimitDecision);
type DeniedResponse = dyn Fn(&RateLimitDecision) -> HttpResponse;

/// Rate limit middleware.
///
/// Checks every request against a [WindowLimiter] before the wrapped service runs; denied
/// requests never reach it.
pub struct RateLimiter<St> {
    limiter: WindowLimiter<St>,
    identity_fn: Rc<IdentityFn>,
    allowed_transformation: Option<Rc<AllowedTransformation>>,
    denied_response: Rc<DeniedResponse>,
}

impl<St> Clone for RateLimiter<St>
where
    St: WindowStore + 'static,
{
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            identity_fn: self.identity_fn.clone(),
            allowed_transformation: self.allowed_transformation.clone(),
            denied_response: self.denied_response.clone(),
        }
    }
}

impl<St> RateLimiter<St>
where
    St: WindowStore + 'static,
{
    /// # Arguments
    ///
    /// * `limiter`: The policies and store to check requests against.
    pub fn builder(limiter: WindowLimiter<St>) -> RateLimiterBuilder<St> {
        RateLimiterBuilder::new(limiter)
    }
}

impl<S, B, St> Transform<S, ServiceRequest> for RateLimiter<St>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
    St: WindowStore + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Transform = RateLimiterMiddleware<S, St>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimiterMiddleware {
            service: Rc::new(RefCell::new(service)),
            limiter: self.limiter.clone(),
            identity_fn: self.identity_fn.clone(),
            allowed_transformation: self.allowed_transformation.clone(),
            denied_response: self.denied_response.clone(),
        })
    }
}

pub struct RateLimiterMiddleware<S, St> {
    service: Rc<RefCell<S>>,
    limiter: WindowLimiter<St>,
    identity_fn: Rc<IdentityFn>,
    allowed_transformation: Option<Rc<AllowedTransformation>>,
    denied_response: Rc<DeniedResponse>,
}

impl<S, B, St> Service<ServiceRequest> for RateLimiterMiddleware<S, St>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
    St: WindowStore + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let limiter = self.limiter.clone();
        let identity_fn = self.identity_fn.clone();
        let allowed_transformation = self.allowed_transformation.clone();
        let denied_response = self.denied_response.clone();

        Box::pin(async move {
            let identifier = (identity_fn)(&req);
            let decision = limiter.check(&identifier).await;

            if decision.is_denied() {
                log::info!(
                    "Rate limited {} {} from {identifier}: {:?}",
                    req.method(),
                    req.path(),
                    decision.failure_reason
                );
                let response = (denied_response)(&decision);
                return Ok(req.into_response(response).map_into_right_body());
            }

            let mut service_response = service.call(req).await?;

            if let Some(transformation) = allowed_transformation {
                (transformation)(service_response.headers_mut(), &decision);
            }

            Ok(service_response.map_into_left_body())
        })
    }
}
