//! Upstream market-data provider.
//!
//! - [`Fetcher`]: the capability the gateway uses to perform one upstream GET.
//! - [`HttpFetcher`]: the reqwest-backed implementation used in production.
//! - [`Endpoints`]: builds the upstream URLs, which double as cache keys.

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;

use crate::error::FetchError;

mod client;
mod endpoints;

pub use client::HttpFetcher;
pub use endpoints::{CoinsQuery, DEFAULT_ORDER, Endpoints, PER_PAGE};

/// Boxed future returned by [`Fetcher::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Bytes, FetchError>> + Send + 'a>>;

/// Performs a single upstream GET and returns the raw 2xx body.
///
/// Implementations report one attempt only: retries, timeouts and JSON
/// validation are applied by the gateway around them.
pub trait Fetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a>;
}

/// Parses a `Retry-After` value given as an integer count of seconds.
///
/// HTTP-date values and anything else unparseable yield `None`, which makes
/// the retry policy fall back to its exponential rate-limit backoff.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
