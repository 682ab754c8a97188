use crate::backend::WindowStore;
use crate::error::{seconds_until, ConfigError, Rejection, StoreError};
use crate::policy::RatePolicy;
use actix_web::rt::time::{timeout, Instant};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Reported as `remaining` when the store failed and the request was let through anyway.
pub const FAIL_OPEN_REMAINING: u64 = 999;

/// How far ahead `reset` is placed when the store failed.
pub const FAIL_OPEN_RESET: Duration = Duration::from_secs(60);

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn is_denied(self) -> bool {
        matches!(self, Self::Denied)
    }
}

/// Why a request was denied.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FailureReason {
    /// The named policy's window is full.
    LimitExceeded { policy: String, message: String },
    /// The store could not be consulted and the limiter is configured to fail closed.
    StoreUnavailable,
}

/// The outcome of checking an identifier against a set of policies.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RateLimitDecision {
    pub decision: Decision,
    /// Request cap of the policy closest to its limit.
    pub limit: u64,
    /// Number of requests that will be permitted until the limit resets, 0 when denied.
    pub remaining: u64,
    /// Time at which the limit resets.
    pub reset: Instant,
    /// Only set when denied.
    pub failure_reason: Option<FailureReason>,
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        self.decision.is_allowed()
    }

    pub fn is_denied(&self) -> bool {
        self.decision.is_denied()
    }

    /// Seconds until the rate limit resets (rounded upwards, so that it is guaranteed to be reset
    /// after waiting for the duration).
    pub fn seconds_until_reset(&self) -> u64 {
        seconds_until(self.reset)
    }

    /// Convert a denial into a [Rejection] that renders as an HTTP error response.
    pub fn into_result(self) -> Result<RateLimitDecision, Rejection> {
        match &self.failure_reason {
            None => Ok(self),
            Some(FailureReason::LimitExceeded { policy, message }) => {
                Err(Rejection::LimitExceeded {
                    policy: policy.clone(),
                    message: message.clone(),
                    reset: self.reset,
                    remaining: self.remaining,
                })
            }
            Some(FailureReason::StoreUnavailable) => {
                Err(Rejection::StoreUnavailable { reset: self.reset })
            }
        }
    }

    fn exceeded(policy: &RatePolicy, reset: Instant) -> Self {
        Self {
            decision: Decision::Denied,
            limit: policy.max_requests(),
            remaining: 0,
            reset,
            failure_reason: Some(FailureReason::LimitExceeded {
                policy: policy.name().to_owned(),
                message: policy.message().to_owned(),
            }),
        }
    }
}

/// Applies an ordered list of [RatePolicy] to client identifiers, all of which must pass.
#[derive(Clone)]
pub struct WindowLimiter<S> {
    store: S,
    policies: Arc<[RatePolicy]>,
    store_timeout: Duration,
    fail_open: bool,
}

impl<S: WindowStore> WindowLimiter<S> {
    pub fn builder(store: S) -> WindowLimiterBuilder<S> {
        WindowLimiterBuilder {
            store,
            policies: Vec::new(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            fail_open: true,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policies(&self) -> &[RatePolicy] {
        &self.policies
    }

    /// Check `identifier` against the configured policies.
    pub async fn check(&self, identifier: &str) -> RateLimitDecision {
        self.check_all(identifier, &self.policies).await
    }

    /// Count a request from `identifier` against each policy in order.
    ///
    /// Stops at the first policy whose window is full; later policies are not consulted and the
    /// increment already applied is kept, so denied requests still use up the window.
    ///
    /// Never fails: a store error or timeout is logged and resolved according to
    /// [WindowLimiterBuilder::fail_open].
    pub async fn check_all(&self, identifier: &str, policies: &[RatePolicy]) -> RateLimitDecision {
        let mut allowed: Option<RateLimitDecision> = None;
        for policy in policies {
            let key = policy.key(identifier);
            let entry = match timeout(
                self.store_timeout,
                self.store.increment(&key, policy.interval()),
            )
            .await
            {
                Ok(Ok(entry)) => entry,
                Ok(Err(e)) => return self.store_failure(&key, e),
                Err(_) => return self.store_failure(&key, StoreError::Timeout(self.store_timeout)),
            };

            if entry.count > policy.max_requests() {
                log::debug!(
                    "Rate limit '{}' exceeded for {key}: {} of {}",
                    policy.name(),
                    entry.count,
                    policy.max_requests()
                );
                return RateLimitDecision::exceeded(policy, entry.reset);
            }

            let remaining = policy.max_requests() - entry.count;
            allowed = Some(match allowed {
                None => RateLimitDecision {
                    decision: Decision::Allowed,
                    limit: policy.max_requests(),
                    remaining,
                    reset: entry.reset,
                    failure_reason: None,
                },
                Some(mut prev) => {
                    if remaining < prev.remaining {
                        prev.remaining = remaining;
                        prev.limit = policy.max_requests();
                    }
                    prev.reset = prev.reset.min(entry.reset);
                    prev
                }
            });
        }
        allowed.unwrap_or_else(|| RateLimitDecision {
            decision: Decision::Allowed,
            limit: u64::MAX,
            remaining: u64::MAX,
            reset: Instant::now(),
            failure_reason: None,
        })
    }

    fn store_failure(&self, key: &str, e: StoreError) -> RateLimitDecision {
        let reset = Instant::now() + FAIL_OPEN_RESET;
        if self.fail_open {
            log::warn!("Rate limit check failed for {key}: {e}, allowing the request anyway");
            RateLimitDecision {
                decision: Decision::Allowed,
                limit: FAIL_OPEN_REMAINING,
                remaining: FAIL_OPEN_REMAINING,
                reset,
                failure_reason: None,
            }
        } else {
            log::error!("Rate limit check failed for {key}: {e}");
            RateLimitDecision {
                decision: Decision::Denied,
                limit: 0,
                remaining: 0,
                reset,
                failure_reason: Some(FailureReason::StoreUnavailable),
            }
        }
    }
}

pub struct WindowLimiterBuilder<S> {
    store: S,
    policies: Vec<RatePolicy>,
    store_timeout: Duration,
    fail_open: bool,
}

impl<S: WindowStore> WindowLimiterBuilder<S> {
    /// Append a policy. Policies are evaluated in the order they are added, so put the most
    /// restrictive (shortest window) first.
    pub fn policy(mut self, policy: RatePolicy) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn policies<I>(mut self, policies: I) -> Self
    where
        I: IntoIterator<Item = RatePolicy>,
    {
        self.policies.extend(policies);
        self
    }

    /// Upper bound on each store round trip, after which the store is considered unavailable.
    ///
    /// Default is 500ms.
    pub fn store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Choose whether to allow a request if the store fails.
    ///
    /// Default is true.
    pub fn fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    pub fn build(self) -> Result<WindowLimiter<S>, ConfigError> {
        if self.policies.is_empty() {
            return Err(ConfigError::NoPolicies);
        }
        let mut suffixes = HashSet::new();
        for policy in &self.policies {
            if !suffixes.insert(policy.key_suffix()) {
                return Err(ConfigError::DuplicateKeySuffix(policy.key_suffix().to_owned()));
            }
        }
        Ok(WindowLimiter {
            store: self.store,
            policies: self.policies.into(),
            store_timeout: self.store_timeout,
            fail_open: self.fail_open,
        })
    }
}
