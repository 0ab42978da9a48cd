//! Exponential backoff with jitter for outbound calls.
//!
//! Every surface and generation call goes through [`RetryPolicy::execute`].
//! Errors are classified by [`crate::Error::retry_class`]: rate limits and transient
//! failures are retried, everything else is returned on the first attempt.

use crate::config::RetryConfig;
use crate::error::{Result, RetryClass};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry budget and backoff shape
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay(),
            max_attempts: config.max_attempts.max(1),
            jitter_fraction: config.jitter_fraction.clamp(0.0, 1.0),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Pre-jitter delay before retry number `attempt` (1-based).
    ///
    /// `min(max_delay, initial_delay * 2^(attempt-1))`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Apply uniform jitter in `[-d*j, +d*j]`, clamped at zero.
    pub fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_fraction <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = delay.as_secs_f64() * self.jitter_fraction;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
    }

    /// Run `operation` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// Returns the last error on exhaustion.
    pub async fn execute<T, F, Fut>(&self, name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = name, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let delay = match err.retry_class() {
                RetryClass::Permanent => return Err(err),
                _ if attempt >= self.max_attempts => {
                    warn!(
                        operation = name,
                        attempts = attempt,
                        error = %err,
                        "Retry budget exhausted"
                    );
                    return Err(err);
                }
                RetryClass::RateLimited {
                    retry_after: Some(wait),
                } => wait,
                _ => self.jittered(self.backoff_delay(attempt)),
            };

            warn!(
                operation = name,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after failure"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Parse a `Retry-After` header value.
///
/// Accepts delta-seconds or an HTTP date. Returns `None` for invalid values
/// and for dates already in the past.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (when - Utc::now()).to_std().ok()
}
