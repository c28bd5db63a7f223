//! Reconciler configuration.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::poller::PollerConfig;
use crate::retry::RetryPolicy;

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid value for {var}: '{value}' ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Default create timeout.
pub const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(10 * 60); // 10 minutes

/// Default update timeout.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(10 * 60); // 10 minutes

/// Default delete timeout.
pub const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(15 * 60); // 15 minutes

/// Reconciler configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerConfig {
    /// Budget for create plus wait-for-stable.
    pub create_timeout: Duration,

    /// Budget for waiting on an update to settle.
    pub update_timeout: Duration,

    /// Budget for delete-side waits (cleanup, deletion).
    pub delete_timeout: Duration,

    /// Poll pacing and not-found tolerance.
    pub poller: PollerConfig,

    /// Retry budget for transient API errors.
    pub retry: RetryPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            create_timeout: DEFAULT_CREATE_TIMEOUT,
            update_timeout: DEFAULT_UPDATE_TIMEOUT,
            delete_timeout: DEFAULT_DELETE_TIMEOUT,
            poller: PollerConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ReconcilerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup. Unset keys keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, "PROVIS_CREATE_TIMEOUT_SECS")? {
            config.create_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "PROVIS_UPDATE_TIMEOUT_SECS")? {
            config.update_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "PROVIS_DELETE_TIMEOUT_SECS")? {
            config.delete_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "PROVIS_POLL_INTERVAL_MS")? {
            config.poller.backoff.base = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "PROVIS_POLL_MAX_INTERVAL_MS")? {
            config.poller.backoff.max = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var(&lookup, "PROVIS_NOT_FOUND_BUDGET")? {
            config.poller.not_found_budget = n;
        }
        if let Some(n) = parse_var(&lookup, "PROVIS_MAX_RETRIES")? {
            config.retry.max_retries = n;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "PROVIS_RETRY_BASE_MS")? {
            config.retry.backoff.base = Duration::from_millis(ms);
        }

        if config.poller.backoff.max < config.poller.backoff.base {
            return Err(ConfigError::InvalidValue {
                var: "PROVIS_POLL_MAX_INTERVAL_MS",
                value: config.poller.backoff.max.as_millis().to_string(),
                reason: "must not be below PROVIS_POLL_INTERVAL_MS".to_string(),
            });
        }

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            var,
            value,
            reason: e.to_string(),
        })
}
