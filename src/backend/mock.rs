//! In-memory [`BackendSession`], used by the dispatcher's own tests and by
//! the end-to-end scenarios the core is validated against.
//!
//! Grounded on the original `pkg/client.MockClient` (a bare `HashMap` behind
//! no locking, single-threaded tests only), generalized from a blocking
//! `std::sync::RwLock` + OS thread to a `tokio::sync::Mutex` + background
//! task since this whole binary runs on Tokio.

use super::{BackendSession, CallContext};
use crate::errors::BackendError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Store {
    strings: HashMap<String, StringEntry>,
    hashes: HashMap<String, HashMap<String, String>>,
}

impl Store {
    fn is_live(&self, key: &str) -> bool {
        match self.strings.get(key) {
            Some(entry) => entry.expires_at.map_or(true, |at| at > Instant::now()),
            None => false,
        }
    }

    fn sweep_expired(&mut self) {
        let now = Instant::now();
        self.strings.retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
    }
}

/// An in-memory backend instance. Cheap to clone — the store is shared via
/// `Arc`, so a clone is another handle onto the same data, matching how a
/// real `TcpBackendSession` would be shared as a single connection.
#[derive(Clone)]
pub struct MockBackendSession {
    store: Arc<Mutex<Store>>,
}

impl MockBackendSession {
    pub fn new() -> MockBackendSession {
        MockBackendSession {
            store: Arc::new(Mutex::new(Store::default())),
        }
    }

    /// Pre-populates the string store — used to set up the §8 end-to-end
    /// scenarios (`key_i` → `value_i`).
    pub fn seeded(entries: impl IntoIterator<Item = (String, String)>) -> MockBackendSession {
        let session = MockBackendSession::new();
        {
            let mut store = session.store.try_lock().expect("uncontended at construction");
            for (key, value) in entries {
                store.strings.insert(
                    key,
                    StringEntry {
                        value,
                        expires_at: None,
                    },
                );
            }
        }
        session
    }

    /// Spawns the periodic expiry sweep as its own Tokio task. Stops when
    /// `cancellation` fires.
    pub fn spawn_eviction_task(
        &self,
        period: Duration,
        cancellation: CancellationToken,
    ) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = tokio::time::sleep(period) => {
                        store.lock().await.sweep_expired();
                    }
                }
            }
        })
    }
}

impl Default for MockBackendSession {
    fn default() -> MockBackendSession {
        MockBackendSession::new()
    }
}

impl BackendSession for MockBackendSession {
    async fn ping(&self, _ctx: &CallContext) -> Result<(), BackendError> {
        Ok(())
    }

    async fn get(&self, _ctx: &CallContext, key: &str) -> Result<String, BackendError> {
        let store = self.store.lock().await;
        if store.is_live(key) {
            Ok(store.strings[key].value.clone())
        } else {
            Err(BackendError::NotFound)
        }
    }

    async fn set(
        &self,
        _ctx: &CallContext,
        key: &str,
        value: &str,
        expire: Option<Duration>,
    ) -> Result<(), BackendError> {
        let mut store = self.store.lock().await;
        store.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: expire.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn hget(&self, _ctx: &CallContext, key: &str, field: &str) -> Result<String, BackendError> {
        let store = self.store.lock().await;
        store
            .hashes
            .get(key)
            .and_then(|h| h.get(field))
            .cloned()
            .ok_or(BackendError::NotFound)
    }

    async fn hset(
        &self,
        _ctx: &CallContext,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<(), BackendError> {
        let mut store = self.store.lock().await;
        store
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, _ctx: &CallContext, keys: &[String]) -> Result<i64, BackendError> {
        let mut store = self.store.lock().await;
        let mut removed = 0i64;
        for key in keys {
            if store.is_live(key) {
                store.strings.remove(key);
                removed += 1;
            }
            if store.hashes.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, _ctx: &CallContext, keys: &[String]) -> Result<i64, BackendError> {
        let store = self.store.lock().await;
        let count = keys
            .iter()
            .filter(|key| store.is_live(key) || store.hashes.contains_key(key.as_str()))
            .count();
        Ok(count as i64)
    }

    async fn keys(&self, _ctx: &CallContext, pattern: &str) -> Result<Vec<String>, BackendError> {
        let store = self.store.lock().await;
        let all_match = pattern == "*";
        Ok(store
            .strings
            .keys()
            .filter(|k| store.is_live(k))
            .filter(|k| all_match || k.as_str() == pattern)
            .cloned()
            .collect())
    }

    async fn append(&self, _ctx: &CallContext, key: &str, value: &str) -> Result<i64, BackendError> {
        let mut store = self.store.lock().await;
        let entry = store.strings.entry(key.to_string()).or_insert(StringEntry {
            value: String::new(),
            expires_at: None,
        });
        entry.value.push_str(value);
        Ok(entry.value.len() as i64)
    }

    async fn incr_by(&self, ctx: &CallContext, key: &str, delta: i64) -> Result<i64, BackendError> {
        self.add(ctx, key, delta).await
    }

    async fn decr_by(&self, ctx: &CallContext, key: &str, delta: i64) -> Result<i64, BackendError> {
        self.add(ctx, key, -delta).await
    }

    async fn ttl(&self, _ctx: &CallContext, key: &str) -> Result<i64, BackendError> {
        let store = self.store.lock().await;
        match store.strings.get(key) {
            Some(entry) if store.is_live(key) => match entry.expires_at {
                Some(at) => Ok(at.saturating_duration_since(Instant::now()).as_secs() as i64),
                None => Ok(0),
            },
            _ => Ok(-2),
        }
    }

    async fn expire(&self, _ctx: &CallContext, key: &str, seconds: u64) -> Result<i64, BackendError> {
        let mut store = self.store.lock().await;
        if store.is_live(key) {
            let entry = store.strings.get_mut(key).expect("checked live above");
            entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds));
            Ok(1)
        } else {
            Ok(0)
        }
    }
}

impl MockBackendSession {
    async fn add(&self, _ctx: &CallContext, key: &str, delta: i64) -> Result<i64, BackendError> {
        let mut store = self.store.lock().await;
        let entry = store.strings.entry(key.to_string()).or_insert(StringEntry {
            value: "0".to_string(),
            expires_at: None,
        });
        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| BackendError::Remote("value is not an integer".to_string()))?;
        let updated = current + delta;
        entry.value = updated.to_string();
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CallContext {
        CallContext::background()
    }

    #[tokio::test]
    async fn get_missing_key_errors() {
        let session = MockBackendSession::new();
        let err = session.get(&ctx(), "missing").await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound));
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let session = MockBackendSession::new();
        session.set(&ctx(), "k", "v", None).await.unwrap();
        assert_eq!(session.get(&ctx(), "k").await.unwrap(), "v");
    }

    #[tokio::test]
    async fn del_counts_only_existing_keys() {
        let session = MockBackendSession::seeded([("a".into(), "1".into())]);
        let removed = session
            .del(&ctx(), &["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn incr_and_decr_compose() {
        let session = MockBackendSession::new();
        session.set(&ctx(), "counter", "1", None).await.unwrap();
        assert_eq!(session.incr_by(&ctx(), "counter", 1).await.unwrap(), 2);
        assert_eq!(session.incr_by(&ctx(), "counter", 8).await.unwrap(), 10);
        assert_eq!(session.decr_by(&ctx(), "counter", 1).await.unwrap(), 9);
        assert_eq!(session.decr_by(&ctx(), "counter", 4).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn expire_then_ttl_reports_remaining_seconds() {
        let session = MockBackendSession::new();
        session.set(&ctx(), "k", "v", None).await.unwrap();
        assert_eq!(session.ttl(&ctx(), "k").await.unwrap(), 0);
        session.expire(&ctx(), "k", 10).await.unwrap();
        assert!(session.ttl(&ctx(), "k").await.unwrap() >= 9);
    }

    #[tokio::test]
    async fn ttl_on_missing_key_is_minus_two() {
        let session = MockBackendSession::new();
        assert_eq!(session.ttl(&ctx(), "missing").await.unwrap(), -2);
    }

    #[tokio::test]
    async fn keys_star_lists_live_keys_only() {
        let session = MockBackendSession::seeded([
            ("key_0".into(), "value_0".into()),
            ("key_1".into(), "value_1".into()),
        ]);
        let mut keys = session.keys(&ctx(), "*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["key_0".to_string(), "key_1".to_string()]);
    }
}
