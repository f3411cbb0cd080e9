//! Fetch cache gateway between inbound requests and the upstream.
//!
//! [`Gateway::resolve`] serves a key from memory while it is fresh, otherwise
//! fetches it through the [`RetryPolicy`], coalescing concurrent misses for the
//! same key onto a single upstream fetch.
//!
//! The store and the in-flight registry sit behind one mutex, which is never
//! held across an `.await`. The lookup that registers a fetch and the
//! settlement that stores its result are each a single critical section.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use serde::de::IgnoredAny;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::error::{FetchError, GatewayError};
use crate::retry::RetryPolicy;
use crate::upstream::Fetcher;

mod inflight;
mod store;

pub use inflight::{FetchOutcome, InFlight, PendingFetch};
pub use store::{CacheEntry, CacheStore, Payload};

/// Default bound on a single upstream attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Counters describing how requests were served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    /// Served from a fresh entry.
    pub hits: u64,
    /// Started a new upstream fetch.
    pub misses: u64,
    /// Joined a fetch another request had started.
    pub coalesced: u64,
    /// Fetches that exhausted the retry policy.
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    failures: AtomicU64,
}

#[derive(Default)]
struct State {
    store: CacheStore,
    in_flight: InFlight,
}

struct Inner {
    state: Mutex<State>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    counters: Counters,
}

impl Inner {
    // The state is only ever mutated by single, non-panicking map operations,
    // so a poisoned lock still guards consistent data.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn fetch_with_retry(&self, key: &str, fetcher: &dyn Fetcher) -> FetchOutcome {
        let timeout = self.attempt_timeout;
        self.policy
            .run(key, |attempt| async move {
                debug!(key, attempt = attempt + 1, "fetching from upstream");
                let body = tokio::time::timeout(timeout, fetcher.fetch(key))
                    .await
                    .map_err(|_| FetchError::Timeout(timeout))??;
                serde_json::from_slice::<IgnoredAny>(&body)
                    .map_err(|e| FetchError::Malformed(e.to_string()))?;
                Ok::<_, FetchError>(Payload::from(body))
            })
            .await
    }
}

/// Clears the in-flight registration if the fetch task ends without settling
/// (panic or runtime shutdown), so later requests start a new fetch instead of
/// joining a dead one.
struct SettleGuard {
    inner: Arc<Inner>,
    key: String,
    settled: bool,
}

impl SettleGuard {
    fn settle(mut self, outcome: &FetchOutcome) {
        let mut state = self.inner.state();
        if let Ok(payload) = outcome {
            state
                .store
                .insert(self.key.clone(), payload.clone(), Instant::now());
        }
        state.in_flight.settle(&self.key);
        self.settled = true;
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.inner.state().in_flight.settle(&self.key);
        }
    }
}

/// The fetch cache gateway.
///
/// Cheap to clone; clones share one store. Construct one per process and hand
/// it to whatever serves requests.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use coingate::cache::Gateway;
/// use coingate::upstream::{Fetcher, HttpFetcher};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let gateway = Gateway::default();
/// let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(Duration::from_secs(5))?);
/// let payload = gateway
///     .resolve("https://api.coingecko.com/api/v3/global", Duration::from_secs(60), fetcher)
///     .await?;
/// println!("{} bytes", payload.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), DEFAULT_ATTEMPT_TIMEOUT)
    }
}

impl Gateway {
    /// Creates a gateway with an empty store.
    ///
    /// `attempt_timeout` bounds every individual upstream attempt.
    pub fn new(policy: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                policy,
                attempt_timeout,
                counters: Counters::default(),
            }),
        }
    }

    /// Returns the payload for `key`.
    ///
    /// - A fresh entry (`now - fetched_at < window`) is returned without
    ///   touching the upstream.
    /// - If another request is already fetching `key`, its outcome is awaited
    ///   and returned.
    /// - Otherwise `fetcher` is called under the retry policy. Success
    ///   overwrites the entry; failure leaves the store as it was, including
    ///   any stale entry, and is returned to every waiting caller.
    pub async fn resolve(
        &self,
        key: &str,
        window: Duration,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Payload, GatewayError> {
        let pending = {
            let mut state = self.inner.state();

            if let Some(payload) = state.store.get_fresh(key, window, Instant::now()) {
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache hit");
                return Ok(payload);
            }

            match state.in_flight.join(key) {
                Some(pending) => {
                    self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "joining in-flight fetch");
                    pending
                }
                None => {
                    self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "cache miss");
                    let pending = self.spawn_fetch(key, fetcher);
                    state.in_flight.register(key, pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    // The fetch runs on its own task so that a caller going away does not
    // cancel it for the others. Settlement needs the state lock, which the
    // caller holds until the registration is in place.
    fn spawn_fetch(&self, key: &str, fetcher: Arc<dyn Fetcher>) -> PendingFetch {
        let guard = SettleGuard {
            inner: Arc::clone(&self.inner),
            key: key.to_owned(),
            settled: false,
        };

        let task = tokio::spawn(async move {
            let inner = Arc::clone(&guard.inner);
            let outcome = inner.fetch_with_retry(&guard.key, fetcher.as_ref()).await;
            if let Err(e) = &outcome {
                inner.counters.failures.fetch_add(1, Ordering::Relaxed);
                error!(key = %guard.key, error = %e, "upstream fetch failed");
            }
            guard.settle(&outcome);
            outcome
        });

        async move {
            task.await
                .unwrap_or_else(|e| Err(GatewayError::Aborted(e.to_string())))
        }
        .boxed()
        .shared()
    }

    /// The entry currently stored for `key`, fresh or not.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.inner.state().store.get(key).cloned()
    }

    /// Number of keys with a stored entry.
    pub fn len(&self) -> usize {
        self.inner.state().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state().store.is_empty()
    }

    /// Number of upstream fetches currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.state().in_flight.len()
    }

    /// Drops every stored entry. Running fetches still settle normally.
    pub fn clear(&self) {
        self.inner.state().store.clear();
    }

    pub fn stats(&self) -> GatewayStats {
        let c = &self.inner.counters;
        GatewayStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
        }
    }
}
