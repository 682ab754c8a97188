use crate::error::ConfigError;
use std::time::Duration;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);

/// A single rate limit: at most `max_requests` within each `interval`.
///
/// Policies are immutable once constructed, the constructors reject limits that could never allow
/// a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatePolicy {
    name: String,
    interval: Duration,
    max_requests: u64,
    key_suffix: String,
    message: String,
}

impl RatePolicy {
    /// # Arguments
    ///
    /// * `name`: Identifies the policy in decisions and logs, also used for the default key suffix
    ///   (`":<name>"`).
    /// * `interval`: The rate limiting window.
    /// * `max_requests`: The total requests to be allowed within the window.
    pub fn new(name: &str, interval: Duration, max_requests: u64) -> Result<Self, ConfigError> {
        if max_requests == 0 {
            return Err(ConfigError::ZeroMaxRequests(name.to_owned()));
        }
        if interval.is_zero() {
            return Err(ConfigError::ZeroInterval(name.to_owned()));
        }
        Ok(Self {
            name: name.to_owned(),
            interval,
            max_requests,
            key_suffix: format!(":{name}"),
            message: "Too many requests. Please try again later.".to_owned(),
        })
    }

    pub fn per_minute(max_requests: u64) -> Result<Self, ConfigError> {
        Ok(Self::new("minute", MINUTE, max_requests)?
            .with_message("Too many requests. Please wait a moment before trying again."))
    }

    pub fn per_hour(max_requests: u64) -> Result<Self, ConfigError> {
        Ok(Self::new("hour", HOUR, max_requests)?
            .with_message("Hourly limit exceeded. Please try again later."))
    }

    /// Override the discriminator appended to the client identifier.
    pub fn with_key_suffix(mut self, key_suffix: &str) -> Self {
        self.key_suffix = key_suffix.to_owned();
        self
    }

    /// Override the message returned to the client when this policy denies a request.
    pub fn with_message(mut self, message: &str) -> Self {
        self.message = message.to_owned();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn key_suffix(&self) -> &str {
        &self.key_suffix
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The store key tracking `identifier` under this policy.
    pub fn key(&self, identifier: &str) -> String {
        format!("{identifier}{}", self.key_suffix)
    }
}
