//! Retry policy: failure classification and backoff delays.
//!
//! Pure functions only; the single source of randomness is the jitter factor,
//! which [`RetryPolicy::delay_with_jitter`] takes explicitly.

use std::time::Duration;

use rand::Rng;

use crate::config::{ConfigError, BACKOFF_BASE_MS_KEY, BACKOFF_MAX_MS_KEY, MAX_ATTEMPTS_KEY};

/// Lower/upper bound of the multiplicative jitter factor.
pub const JITTER_MIN: f64 = 0.8;
pub const JITTER_MAX: f64 = 1.2;

/// Capability of an error to report the HTTP-like status it carries, if any.
pub trait HasStatusCode {
    fn status_code(&self) -> Option<u16>;
}

/// Whether another attempt is warranted after a failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Retriability {
    Retriable,
    Terminal,
}

impl Retriability {
    pub fn is_retriable(&self) -> bool {
        matches!(self, Retriability::Retriable)
    }
}

/// Classify a failed remote call.
///
/// - no status (connection failure, timeout): retriable
/// - 4xx: terminal, the request itself is at fault
/// - 5xx: retriable, the worker may recover
/// - anything else (1xx-3xx reported as a failure): terminal
pub fn classify<E>(err: &E) -> Retriability
where
    E: HasStatusCode + ?Sized,
{
    match err.status_code() {
        None => Retriability::Retriable,
        Some(status) if status >= 500 => Retriability::Retriable,
        Some(_) => Retriability::Terminal,
    }
}

/// Retry configuration for the generation orchestrator.
///
/// Can only be built through [`RetryPolicy::new`], so `max_attempts >= 1` and
/// `0 < base_delay <= max_delay` always hold. Violations are reported against
/// the configuration keys the values are loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::invalid(
                MAX_ATTEMPTS_KEY,
                max_attempts,
                "must be at least 1",
            ));
        }
        if base_delay.is_zero() {
            return Err(ConfigError::invalid(
                BACKOFF_BASE_MS_KEY,
                base_delay.as_millis(),
                "must be positive",
            ));
        }
        if base_delay > max_delay {
            return Err(ConfigError::invalid(
                BACKOFF_MAX_MS_KEY,
                max_delay.as_millis(),
                format!("must be >= {BACKOFF_BASE_MS_KEY} ({})", base_delay.as_millis()),
            ));
        }

        Ok(Self {
            max_attempts,
            base_delay,
            max_delay,
        })
    }

    /// Convenience constructor from millisecond values.
    pub fn from_millis(max_attempts: u32, base_ms: u64, max_ms: u64) -> Result<Self, ConfigError> {
        Self::new(
            max_attempts,
            Duration::from_millis(base_ms),
            Duration::from_millis(max_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Whether another attempt may follow attempt number `attempt` (1-indexed).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Un-jittered delay after attempt `attempt` (1-indexed):
    /// `min(max, base * 2^(attempt-1))`, saturating instead of overflowing.
    pub fn exponential_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = millis(self.base_delay);
        let max_ms = millis(self.max_delay);
        let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);

        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }

    /// Delay to sleep before the attempt following `attempt`, with random jitter.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX);
        self.delay_with_jitter(attempt, jitter)
    }

    /// Deterministic form of [`delay_before_attempt`](Self::delay_before_attempt).
    ///
    /// `jitter` is clamped to `[JITTER_MIN, JITTER_MAX]`; the result is rounded to
    /// the nearest millisecond and never exceeds `max_delay`.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exp_ms = millis(self.exponential_delay(attempt)) as f64;
        let jitter = jitter.clamp(JITTER_MIN, JITTER_MAX);
        let jittered = (exp_ms * jitter).round() as u64;

        Duration::from_millis(jittered.min(millis(self.max_delay)))
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
