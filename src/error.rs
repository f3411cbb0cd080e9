//! Error taxonomy for upstream fetches and the gateway built on top of them.

use std::time::Duration;

use thiserror::Error;

/// Why a single upstream attempt failed.
///
/// `Clone` so that one coalesced fetch can hand the same outcome to every
/// waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The upstream answered 429. `retry_after` is the parsed `Retry-After` header.
    #[error("upstream rate limited the request (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Any other non-2xx status.
    #[error("upstream returned HTTP {status}")]
    Status { status: u16 },

    /// Connection, DNS, TLS or body transfer failure.
    #[error("upstream request failed: {0}")]
    Network(String),

    /// The attempt did not complete within the configured timeout.
    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),

    /// A 2xx body that is not valid JSON.
    #[error("upstream returned malformed JSON: {0}")]
    Malformed(String),
}

/// The error surfaced by [`Gateway::resolve`](crate::cache::Gateway::resolve)
/// once the retry policy has given up.
///
/// It is classified from the last attempt's failure; earlier attempt errors
/// are discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Network failures, timeouts or 5xx statuses persisted through every attempt.
    #[error("upstream unavailable after {attempts} attempt(s): {source}")]
    UpstreamUnavailable {
        attempts: u32,
        #[source]
        source: FetchError,
    },

    /// A terminal 4xx (other than 429) on the last attempt.
    #[error("upstream returned HTTP {status} after {attempts} attempt(s)")]
    UpstreamHttp { status: u16, attempts: u32 },

    /// 429 on every attempt.
    #[error("upstream still rate limiting after {attempts} attempt(s)")]
    RateLimited { attempts: u32 },

    #[error("upstream returned malformed JSON: {0}")]
    MalformedResponse(String),

    /// The fetch task was cancelled or panicked before settling.
    #[error("upstream fetch aborted: {0}")]
    Aborted(String),
}

impl GatewayError {
    /// Classifies the final attempt's failure.
    pub fn exhausted(attempts: u32, last: FetchError) -> Self {
        match last {
            FetchError::RateLimited { .. } => Self::RateLimited { attempts },
            FetchError::Status { status } if (400..500).contains(&status) => {
                Self::UpstreamHttp { status, attempts }
            }
            FetchError::Malformed(details) => Self::MalformedResponse(details),
            source @ (FetchError::Status { .. }
            | FetchError::Network(_)
            | FetchError::Timeout(_)) => Self::UpstreamUnavailable { attempts, source },
        }
    }
}
