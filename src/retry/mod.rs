//! Retry policy for upstream calls.
//!
//! One [`RetryPolicy`] replaces the per-endpoint retry loops. It is
//! parameterized by:
//!
//! - the maximum number of attempts,
//! - a [`Backoff`] for ordinary failures (default: linear, 500 ms steps),
//! - a [`Backoff`] for HTTP 429 (default: exponential from 1 s), which a
//!   valid `Retry-After` header overrides.
//!
//! With the defaults, an upstream that keeps answering 503 is attempted three
//! times with waits of 500 ms and 1000 ms in between; an upstream that answers
//! 429 with `Retry-After: 2` is waited on for exactly 2 s between attempts.
//! There is never a wait after the final attempt, and no single wait exceeds
//! [`RetryPolicy::max_delay`], however long a `Retry-After` asks for.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{FetchError, GatewayError};

/// How long to wait before the next attempt, as a function of the 0-indexed
/// attempt that just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `step * (attempt + 1)`: 1×, 2×, 3× ...
    Linear { step: Duration },
    /// `base * 2^attempt`: 1×, 2×, 4× ...
    Exponential { base: Duration },
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Linear { step } => step.saturating_mul(attempt.saturating_add(1)),
            Backoff::Exponential { base } => {
                base.saturating_mul(2u32.checked_pow(attempt).unwrap_or(u32::MAX))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub failure_backoff: Backoff,
    pub rate_limit_backoff: Backoff,
    /// Upper bound on any single wait, including one asked for by `Retry-After`.
    pub max_delay: Duration,
}

/// Default cap on a single wait between attempts.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            failure_backoff: Backoff::Linear {
                step: Duration::from_millis(500),
            },
            rate_limit_backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
            },
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Wait before the attempt following the failed 0-indexed `attempt`.
    ///
    /// A 429 uses its `Retry-After` when present and the rate-limit backoff
    /// otherwise; every other failure uses the failure backoff. The result is
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32, error: &FetchError) -> Duration {
        let delay = match error {
            FetchError::RateLimited {
                retry_after: Some(wait),
            } => *wait,
            FetchError::RateLimited { retry_after: None } => {
                self.rate_limit_backoff.delay(attempt)
            }
            _ => self.failure_backoff.delay(attempt),
        };
        delay.min(self.max_delay)
    }

    /// Runs `attempt_fn` until it succeeds or the attempt budget is spent.
    ///
    /// `attempt_fn` receives the 0-indexed attempt number. The first success
    /// returns immediately; after the last failure the error is classified by
    /// [`GatewayError::exhausted`].
    pub async fn run<T, F, Fut>(&self, key: &str, mut attempt_fn: F) -> Result<T, GatewayError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut state = RetryState::new(self.max_attempts.max(1));

        loop {
            let attempt = state.attempt;
            match attempt_fn(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(key, attempts = attempt + 1, "upstream recovered");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let delay = self.delay_for(attempt, &error);
                    let requested = match &error {
                        FetchError::RateLimited {
                            retry_after: Some(wait),
                        } if *wait > delay => Some(*wait),
                        _ => None,
                    };
                    if let Some(exhausted) = state.record_failure(error) {
                        return Err(exhausted);
                    }
                    if let Some(requested) = requested {
                        warn!(key, ?requested, capped = ?delay, "Retry-After capped");
                    }
                    warn!(
                        key,
                        attempt = attempt + 1,
                        max_attempts = state.max_attempts,
                        ?delay,
                        error = %state.last_error_display(),
                        "upstream attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Progress of one logical request through the policy. Dropped when the
/// request resolves.
#[derive(Debug)]
pub struct RetryState {
    attempt: u32,
    max_attempts: u32,
    last_error: Option<FetchError>,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            last_error: None,
        }
    }

    pub fn attempts_made(&self) -> u32 {
        self.attempt
    }

    /// Records a failed attempt, replacing any earlier error. Returns the
    /// terminal error once no attempts remain.
    pub fn record_failure(&mut self, error: FetchError) -> Option<GatewayError> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return Some(GatewayError::exhausted(self.attempt, error));
        }
        self.last_error = Some(error);
        None
    }

    fn last_error_display(&self) -> String {
        self.last_error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }
}
