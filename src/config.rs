//! Runtime configuration
//!
//! Retry policies for individual nodes and flow-wide defaults, loadable from
//! environment variables (with `.env` support) for applications built on the
//! runtime.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable holding the default attempt count
pub const ENV_MAX_RETRIES: &str = "NODEFLOW_MAX_RETRIES";
/// Environment variable holding the default wait between attempts
pub const ENV_RETRY_WAIT: &str = "NODEFLOW_RETRY_WAIT";
/// Environment variable toggling per-step tracing
pub const ENV_TRACE_STEPS: &str = "NODEFLOW_TRACE_STEPS";
/// Standard log filter variable
pub const ENV_LOG_FILTER: &str = "RUST_LOG";

/// Retry policy around a node's compute phase
///
/// `max_retries` is the total number of attempts, so the default of 1 means
/// "try once, never retry". Attempts are separated by a fixed `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total compute attempts (values below 1 behave as 1)
    pub max_retries: usize,

    /// Delay between consecutive attempts
    #[serde(with = "humantime_serde")]
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            wait: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempt count and no wait
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set the wait interval between attempts
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Single attempt, no retry
    pub fn no_retry() -> Self {
        Self::default()
    }

    /// Effective number of attempts
    pub fn attempts(&self) -> usize {
        self.max_retries.max(1)
    }

    /// Check if another attempt is allowed after `attempts` have run
    pub fn should_retry(&self, attempts: usize) -> bool {
        attempts < self.attempts()
    }
}

/// Flow-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Policy for nodes registered without an explicit one
    pub default_retry: RetryPolicy,

    /// Log every node step at `info` instead of `debug`
    pub trace_steps: bool,

    /// Filter handed to [`crate::telemetry::init_tracing`]
    pub log_filter: String,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            default_retry: RetryPolicy::default(),
            trace_steps: false,
            log_filter: "info".to_string(),
        }
    }
}

impl FlowConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default retry policy
    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }

    /// Enable or disable step tracing
    pub fn with_trace_steps(mut self, enabled: bool) -> Self {
        self.trace_steps = enabled;
        self
    }

    /// Set the log filter
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Load configuration from the process environment.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup, starting from defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup(ENV_MAX_RETRIES) {
            config.default_retry.max_retries =
                val.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidInteger {
                        key: ENV_MAX_RETRIES.to_string(),
                        value: val.clone(),
                    })?;
        }

        if let Some(val) = lookup(ENV_RETRY_WAIT) {
            config.default_retry.wait = humantime::parse_duration(val.trim()).map_err(|_| {
                ConfigError::InvalidDuration {
                    key: ENV_RETRY_WAIT.to_string(),
                    value: val.clone(),
                }
            })?;
        }

        if let Some(val) = lookup(ENV_TRACE_STEPS) {
            config.trace_steps = match val.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => {
                    return Err(ConfigError::InvalidBool {
                        key: ENV_TRACE_STEPS.to_string(),
                        value: val.clone(),
                    })
                }
            };
        }

        if let Some(val) = lookup(ENV_LOG_FILTER) {
            config.log_filter = val;
        }

        Ok(config)
    }
}
