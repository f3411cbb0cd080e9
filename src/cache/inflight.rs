//! Registry of upstream fetches that have started but not settled.
//!
//! A pending fetch is stored as a [`Shared`] future: every caller that misses
//! the cache while the fetch is running clones and awaits the same handle, so
//! the upstream sees one request and all callers see one outcome.

use std::collections::HashMap;

use futures::future::{BoxFuture, Shared};

use super::Payload;
use crate::error::GatewayError;

/// Outcome of one upstream fetch, shared by all callers that coalesced onto it.
pub type FetchOutcome = Result<Payload, GatewayError>;

/// A cloneable handle to a pending fetch.
pub type PendingFetch = Shared<BoxFuture<'static, FetchOutcome>>;

#[derive(Default)]
pub struct InFlight {
    pending: HashMap<String, PendingFetch>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to the pending fetch for `key`, if there is one.
    pub fn join(&self, key: &str) -> Option<PendingFetch> {
        self.pending.get(key).cloned()
    }

    /// Registers the pending fetch for `key`.
    ///
    /// Callers check [`join`](Self::join) first under the same lock, so an
    /// existing registration is never replaced.
    pub fn register(&mut self, key: impl Into<String>, fetch: PendingFetch) {
        self.pending.entry(key.into()).or_insert(fetch);
    }

    /// Clears the registration for `key`. Returns `false` if it was already gone.
    pub fn settle(&mut self, key: &str) -> bool {
        self.pending.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
