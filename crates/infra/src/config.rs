//! Configuration loading and representation.
//!
//! Values are read once at startup into [`GenerationConfig`] and handed to
//! constructors; nothing below the binary looks up configuration on its own.
//! Any missing or malformed required key is a startup-fatal [`ConfigError`].

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::jobs::retry::RetryPolicy;

pub const MAX_ATTEMPTS_KEY: &str = "AI_REQUEST_MAX_ATTEMPTS";
pub const BACKOFF_BASE_MS_KEY: &str = "AI_REQUEST_BACKOFF_BASE_MS";
pub const BACKOFF_MAX_MS_KEY: &str = "AI_REQUEST_BACKOFF_MAX_MS";
pub const WORKER_URL_KEY: &str = "AI_WORKER_URL";
pub const REQUEST_TIMEOUT_MS_KEY: &str = "AI_REQUEST_TIMEOUT_MS";
pub const DATABASE_URL_KEY: &str = "DATABASE_URL";
pub const BIND_ADDR_KEY: &str = "BIND_ADDR";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("config key {0} is not defined")]
    Missing(String),

    #[error("config key {key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, value: impl Display, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Everything the service needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationConfig {
    pub retry: RetryPolicy,
    /// Base URL of the generation worker (`/generate` is appended).
    pub worker_url: String,
    pub request_timeout: Duration,
    /// Postgres connection string; `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub bind_addr: String,
}

impl GenerationConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup (tests pass a map here).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = Source { lookup };

        let max_attempts: u32 = source.required(MAX_ATTEMPTS_KEY)?;
        let base_ms: u64 = source.required(BACKOFF_BASE_MS_KEY)?;
        let max_ms: u64 = source.required(BACKOFF_MAX_MS_KEY)?;
        let retry = RetryPolicy::from_millis(max_attempts, base_ms, max_ms)?;

        let worker_url: String = source.required(WORKER_URL_KEY)?;
        let worker_url = validate_url(WORKER_URL_KEY, worker_url)?;

        let request_timeout = match source.optional::<u64>(REQUEST_TIMEOUT_MS_KEY)? {
            Some(0) => {
                return Err(ConfigError::invalid(REQUEST_TIMEOUT_MS_KEY, 0, "must be positive"));
            }
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        let database_url = source.optional::<String>(DATABASE_URL_KEY)?;
        let bind_addr = source
            .optional::<String>(BIND_ADDR_KEY)?
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        Ok(Self {
            retry,
            worker_url,
            request_timeout,
            database_url,
            bind_addr,
        })
    }
}

struct Source<F> {
    lookup: F,
}

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.raw(key).ok_or_else(|| ConfigError::Missing(key.to_string()))?;
        parse(key, raw)
    }

    fn optional<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.raw(key).map(|raw| parse(key, raw)).transpose()
    }
}

fn parse<T>(key: &str, raw: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>()
        .map_err(|e| ConfigError::invalid(key, &raw, e.to_string()))
}

fn validate_url(key: &str, raw: String) -> Result<String, ConfigError> {
    let parsed = reqwest::Url::parse(&raw).map_err(|e| ConfigError::invalid(key, &raw, e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(raw.trim_end_matches('/').to_string()),
        other => Err(ConfigError::invalid(
            key,
            &raw,
            format!("unsupported scheme {other:?}"),
        )),
    }
}
