//! Poller and backend configuration.
//!
//! Configuration is immutable once a [`QueueFactory`](crate::QueueFactory) has
//! been opened. It can be built in code, or loaded with [`PollerConfig::load`]
//! from an optional file followed by `QUEUE_POLLER__*` environment variables
//! (later sources override earlier ones), e.g.
//! `QUEUE_POLLER__BACKEND__REGION=eu-west-1` sets `backend.region`.

use crate::error::ConfigurationError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Query API version sent with every SQS request unless overridden
pub const DEFAULT_API_VERSION: &str = "2012-11-05";

/// Region used when none is configured
pub const DEFAULT_REGION: &str = "us-east-1";

/// Prefix for configuration environment variables
pub const ENV_PREFIX: &str = "QUEUE_POLLER";

/// Enumeration of supported queue backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    AwsSqs,
    InMemory,
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwsSqs => write!(f, "AwsSqs"),
            Self::InMemory => write!(f, "InMemory"),
        }
    }
}

/// Configuration shared by every queue client opened from one factory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Start the next poll only after every message of the current batch is done
    pub wait: bool,

    /// Minimum time between the start of two poll cycles, in milliseconds
    pub poll_interval_ms: u64,

    /// Hand bodies that are not valid JSON to the handler as raw text
    /// instead of deleting them
    pub ignore_parse_errors: bool,

    /// Backoff applied after a failed fetch
    pub retry: RetryPolicy,

    /// Connection parameters passed through to the SQS backend
    pub backend: AwsSqsConfig,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            wait: false,
            poll_interval_ms: 0,
            ignore_parse_errors: false,
            retry: RetryPolicy::default(),
            backend: AwsSqsConfig::default(),
        }
    }
}

impl PollerConfig {
    /// Set serialized pacing
    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    /// Set the minimum poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Pass undecodable bodies to the handler instead of deleting them
    pub fn with_ignore_parse_errors(mut self, ignore: bool) -> Self {
        self.ignore_parse_errors = ignore;
        self
    }

    /// Set the fetch backoff policy, normalizing out-of-range fields
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry.normalized();
        self
    }

    /// Set the backend connection parameters
    pub fn with_backend(mut self, backend: AwsSqsConfig) -> Self {
        self.backend = backend;
        self
    }

    /// Minimum poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Load configuration from an optional file and the environment
    ///
    /// Sources (applied in order, later sources override earlier ones):
    ///  1. Built-in defaults
    ///  2. `path`, if given; the format follows the file extension
    ///  3. Environment variables prefixed `QUEUE_POLLER` with `__` separators
    ///
    /// The result is validated before it is returned.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        let poller_config: PollerConfig =
            config
                .try_deserialize()
                .map_err(|e| ConfigurationError::Parsing {
                    message: e.to_string(),
                })?;

        poller_config.validate()?;
        Ok(poller_config)
    }

    /// Check the configuration for inconsistent values
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.retry
            .validate()
            .map_err(|message| ConfigurationError::Invalid { message })?;
        self.backend.validate()
    }
}

/// AWS SQS connection configuration
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSqsConfig {
    /// Query API version
    pub api_version: String,
    pub region: String,
    /// Endpoint override, e.g. `http://localhost:4566` for LocalStack
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Upper bound on messages per fetch (1-10); backend default when unset
    pub max_number_of_messages: Option<u32>,
    /// Long-poll wait per fetch in seconds (0-20); queue default when unset
    pub wait_time_seconds: Option<u32>,
    /// Visibility timeout applied to fetched messages; queue default when unset
    pub visibility_timeout_seconds: Option<u32>,
    /// HTTP request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for AwsSqsConfig {
    fn default() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION.to_string(),
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            max_number_of_messages: None,
            wait_time_seconds: None,
            visibility_timeout_seconds: None,
            request_timeout_ms: 30_000,
        }
    }
}

impl std::fmt::Debug for AwsSqsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSqsConfig")
            .field("api_version", &self.api_version)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .field("max_number_of_messages", &self.max_number_of_messages)
            .field("wait_time_seconds", &self.wait_time_seconds)
            .field("visibility_timeout_seconds", &self.visibility_timeout_seconds)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

impl AwsSqsConfig {
    /// Endpoint to send requests to, derived from the region unless overridden
    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://sqs.{}.amazonaws.com", self.region),
        }
    }

    /// HTTP request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Check the configuration for values SQS would reject
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.region.is_empty() {
            return Err(ConfigurationError::Missing {
                key: "backend.region".to_string(),
            });
        }

        if self.api_version.is_empty() {
            return Err(ConfigurationError::Missing {
                key: "backend.api_version".to_string(),
            });
        }

        if let Some(endpoint) = &self.endpoint {
            url::Url::parse(endpoint).map_err(|e| ConfigurationError::Invalid {
                message: format!("backend.endpoint '{}' is not a valid URL: {}", endpoint, e),
            })?;
        }

        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(ConfigurationError::Invalid {
                message: "backend.access_key_id and backend.secret_access_key must be set together"
                    .to_string(),
            });
        }

        if let Some(max) = self.max_number_of_messages {
            if !(1..=10).contains(&max) {
                return Err(ConfigurationError::Invalid {
                    message: format!("backend.max_number_of_messages must be 1-10, got {}", max),
                });
            }
        }

        if let Some(wait) = self.wait_time_seconds {
            if wait > 20 {
                return Err(ConfigurationError::Invalid {
                    message: format!("backend.wait_time_seconds must be 0-20, got {}", wait),
                });
            }
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigurationError::Invalid {
                message: "backend.request_timeout_ms must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
