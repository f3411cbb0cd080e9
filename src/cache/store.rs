//! In-memory cache store with freshness checks.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

/// Verbatim upstream JSON body.
///
/// Cloning shares the underlying buffer, so every cache hit hands out the
/// exact bytes that were fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(Bytes);

impl Payload {
    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deserializes the payload, e.g. into a `serde_json::Value`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.0)
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<&'static str> for Payload {
    fn from(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }
}

/// A successful fetch for one key.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Payload,
    pub fetched_at: Instant,
}

impl CacheEntry {
    /// `true` iff `now - fetched_at < window`.
    pub fn is_fresh(&self, window: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < window
    }
}

/// Key → latest successful fetch.
///
/// Entries are overwritten by newer fetches and never evicted individually;
/// the key space (coin ids plus a few aggregate endpoints) is small.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: HashMap<String, CacheEntry>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Returns the payload for `key` only if it is still within `window`.
    pub fn get_fresh(&self, key: &str, window: Duration, now: Instant) -> Option<Payload> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_fresh(window, now))
            .map(|entry| entry.payload.clone())
    }

    /// Stores `payload` for `key`, replacing any previous entry.
    pub fn insert(&mut self, key: impl Into<String>, payload: Payload, fetched_at: Instant) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                payload,
                fetched_at,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(30);

    #[test]
    fn missing_key_is_none() {
        let store = CacheStore::new();
        assert!(store.get_fresh("k", WINDOW, Instant::now()).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn fresh_until_window_elapses() {
        let mut store = CacheStore::new();
        let t0 = Instant::now();
        store.insert("k", Payload::from("[1]"), t0);

        assert_eq!(store.get_fresh("k", WINDOW, t0), Some(Payload::from("[1]")));
        assert!(
            store
                .get_fresh("k", WINDOW, t0 + Duration::from_millis(29_999))
                .is_some()
        );
        // The window is exclusive: exactly `window` later the entry is stale.
        assert!(store.get_fresh("k", WINDOW, t0 + WINDOW).is_none());
        // Stale entries stay in the store until overwritten.
        assert!(store.get("k").is_some());
    }

    #[test]
    fn insert_overwrites() {
        let mut store = CacheStore::new();
        let t0 = Instant::now();
        store.insert("k", Payload::from("[1]"), t0);
        store.insert("k", Payload::from("[2]"), t0 + WINDOW);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("k").unwrap().payload, Payload::from("[2]"));
        assert_eq!(store.get("k").unwrap().fetched_at, t0 + WINDOW);
    }

    #[test]
    fn clock_going_backwards_counts_as_fresh() {
        let mut store = CacheStore::new();
        let t0 = Instant::now() + Duration::from_secs(5);
        store.insert("k", Payload::from("{}"), t0);
        assert!(store.get_fresh("k", WINDOW, Instant::now()).is_some());
    }

    #[test]
    fn payload_decodes_json() {
        let payload = Payload::from(r#"{"data":{"active_cryptocurrencies":1}}"#);
        let value: serde_json::Value = payload.json().unwrap();
        assert_eq!(value["data"]["active_cryptocurrencies"], 1);
        assert_eq!(payload.len(), payload.as_bytes().len());
    }

    #[test]
    fn clear_empties_store() {
        let mut store = CacheStore::new();
        store.insert("a", Payload::from("1"), Instant::now());
        store.insert("b", Payload::from("2"), Instant::now());
        store.clear();
        assert!(store.is_empty());
    }
}
