//! Distributed state store.
//!
//! [`DistributedState`] offers typed value and hash storage with optional TTL
//! on top of a pluggable [`StateBackend`]: Redis when configured, otherwise an
//! in-process map. Values are JSON encoded.
//!
//! # Failure semantics
//!
//! - Backend outages (`BoardError::StoreUnavailable`) are logged and
//!   swallowed: reads return "absent", writes and deletes are skipped.
//! - [`DistributedState::set_value_if_absent`],
//!   [`DistributedState::set_hash_entry_if_absent`] and
//!   [`DistributedState::exists`] propagate outages, because their callers need
//!   an authoritative answer.
//! - Encoding failures and non-transient backend errors propagate.
//! - Stored values that fail to decode are logged and read as absent.
//!
//! # Staleness
//!
//! The `*_checked` readers take an async `is_stale` predicate. A stale hit is
//! deleted and reported as absent. Eviction only happens on the read path;
//! bulk reclamation is the cluster sweep's job.

pub mod lua_scripts;
pub mod memory;
mod pattern;
pub mod redis_backend;

pub use memory::MemoryBackend;
pub use redis_backend::RedisBackend;

use crate::errors::BoardError;
use crate::observability::metrics;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Raw string storage used by [`DistributedState`].
///
/// Implementations must make `set_if_absent` and `hset_if_absent` atomic, refresh the whole hash
/// key's TTL on `hset`, and delete a hash key once `hdel` removes its last field.
#[async_trait::async_trait]
pub trait StateBackend: Send + Sync {
    /// Whether the backend is shared with other processes.
    fn is_distributed(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Option<String>, BoardError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), BoardError>;

    /// Write only if the key does not exist. Returns whether the write happened.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, BoardError>;

    async fn delete(&self, key: &str) -> Result<(), BoardError>;

    async fn exists(&self, key: &str) -> Result<bool, BoardError>;

    /// All keys matching a glob pattern (`*`, `?`).
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, BoardError>;

    /// All `(field, value)` pairs of a hash, sorted by field. Missing key = empty.
    async fn hget_all(&self, key: &str) -> Result<Vec<(String, String)>, BoardError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, BoardError>;

    async fn hset(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), BoardError>;

    /// Write one field only if it is not already present. Returns whether the
    /// write happened; the key TTL is refreshed only on success.
    async fn hset_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, BoardError>;

    async fn hdel(&self, key: &str, field: &str) -> Result<(), BoardError>;
}

/// Convert a TTL to whole seconds for the backend: rounded up, minimum 1.
pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_millis().div_ceil(1000).max(1);
    u64::try_from(secs).unwrap_or(u64::MAX)
}

/// Typed, TTL-aware store shared by every component of a node.
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct DistributedState {
    backend: Arc<dyn StateBackend>,
}

impl DistributedState {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self { backend }
    }

    /// Process-private in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn is_distributed(&self) -> bool {
        self.backend.is_distributed()
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    pub async fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, BoardError> {
        let raw = tolerate("get", key, self.backend.get(key).await, None)?;
        Ok(raw.and_then(|raw| decode(key, None, &raw)))
    }

    /// Read a value, evicting it when `is_stale` says so.
    pub async fn get_value_checked<T, F, Fut>(
        &self,
        key: &str,
        is_stale: F,
    ) -> Result<Option<T>, BoardError>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> Fut,
        Fut: Future<Output = bool>,
    {
        let Some(value) = self.get_value::<T>(key).await? else {
            return Ok(None);
        };

        if is_stale(&value).await {
            debug!(target: "board.store", key = %key, "Evicting stale value");
            self.delete_value(key).await?;
            return Ok(None);
        }

        Ok(Some(value))
    }

    /// Unconditionally overwrite `key`.
    pub async fn set_value<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), BoardError> {
        let raw = serde_json::to_string(value)?;
        tolerate("set", key, self.backend.set(key, &raw, ttl).await, ())
    }

    /// Conditional write used for leader election. Outages propagate.
    pub async fn set_value_if_absent<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool, BoardError> {
        let raw = serde_json::to_string(value)?;
        self.backend.set_if_absent(key, &raw, ttl).await
    }

    pub async fn delete_value(&self, key: &str) -> Result<(), BoardError> {
        tolerate("del", key, self.backend.delete(key).await, ())
    }

    /// Key existence check. Outages propagate so callers can pick a safe default.
    pub async fn exists(&self, key: &str) -> Result<bool, BoardError> {
        self.backend.exists(key).await
    }

    pub async fn list_value_keys(&self, pattern: &str) -> Result<Vec<String>, BoardError> {
        tolerate(
            "scan",
            pattern,
            self.backend.scan_keys(pattern).await,
            Vec::new(),
        )
    }

    // ------------------------------------------------------------------
    // Hashes
    // ------------------------------------------------------------------

    /// All decodable `(field, value)` pairs, sorted by field.
    pub async fn get_hash<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Vec<(String, T)>, BoardError> {
        let raw = tolerate("hgetall", key, self.backend.hget_all(key).await, Vec::new())?;

        Ok(raw
            .into_iter()
            .filter_map(|(field, raw)| decode(key, Some(&field), &raw).map(|value| (field, value)))
            .collect())
    }

    /// All fields of a hash, deleting those `is_stale(field, value)` flags.
    pub async fn get_hash_checked<T, F, Fut>(
        &self,
        key: &str,
        is_stale: F,
    ) -> Result<Vec<(String, T)>, BoardError>
    where
        T: DeserializeOwned,
        F: Fn(&str, &T) -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut live = Vec::new();

        for (field, value) in self.get_hash::<T>(key).await? {
            if is_stale(&field, &value).await {
                debug!(
                    target: "board.store",
                    key = %key,
                    field = %field,
                    "Evicting stale hash field"
                );
                self.delete_hash_entry(key, &field).await?;
            } else {
                live.push((field, value));
            }
        }

        Ok(live)
    }

    pub async fn get_hash_entry<T: DeserializeOwned>(
        &self,
        key: &str,
        field: &str,
    ) -> Result<Option<T>, BoardError> {
        let raw = tolerate("hget", key, self.backend.hget(key, field).await, None)?;
        Ok(raw.and_then(|raw| decode(key, Some(field), &raw)))
    }

    pub async fn get_hash_entry_checked<T, F, Fut>(
        &self,
        key: &str,
        field: &str,
        is_stale: F,
    ) -> Result<Option<T>, BoardError>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> Fut,
        Fut: Future<Output = bool>,
    {
        let Some(value) = self.get_hash_entry::<T>(key, field).await? else {
            return Ok(None);
        };

        if is_stale(&value).await {
            debug!(
                target: "board.store",
                key = %key,
                field = %field,
                "Evicting stale hash field"
            );
            self.delete_hash_entry(key, field).await?;
            return Ok(None);
        }

        Ok(Some(value))
    }

    /// Write one field and refresh the TTL of the whole hash.
    pub async fn set_hash_entry<T: Serialize>(
        &self,
        key: &str,
        field: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), BoardError> {
        let raw = serde_json::to_string(value)?;
        tolerate(
            "hset",
            key,
            self.backend.hset(key, field, &raw, ttl).await,
            (),
        )
    }

    /// Claim one field of a hash. Returns `false` if another writer holds it.
    ///
    /// Outages propagate like [`DistributedState::set_value_if_absent`].
    pub async fn set_hash_entry_if_absent<T: Serialize>(
        &self,
        key: &str,
        field: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool, BoardError> {
        let raw = serde_json::to_string(value)?;
        self.backend.hset_if_absent(key, field, &raw, ttl).await
    }

    /// Delete one field; the hash key disappears with its last field.
    pub async fn delete_hash_entry(&self, key: &str, field: &str) -> Result<(), BoardError> {
        tolerate("hdel", key, self.backend.hdel(key, field).await, ())
    }

    pub async fn list_hash_keys(&self, pattern: &str) -> Result<Vec<String>, BoardError> {
        self.list_value_keys(pattern).await
    }
}

/// Swallow backend outages into `fallback`, propagate everything else.
fn tolerate<T>(
    operation: &'static str,
    key: &str,
    result: Result<T, BoardError>,
    fallback: T,
) -> Result<T, BoardError> {
    match result {
        Err(e) if e.is_unavailable() => {
            warn!(
                target: "board.store",
                operation = operation,
                key = %key,
                error = %e,
                "Store unavailable, continuing without shared state"
            );
            metrics::record_store_unavailable(operation);
            Ok(fallback)
        }
        other => other,
    }
}

fn decode<T: DeserializeOwned>(key: &str, field: Option<&str>, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(
                target: "board.store",
                key = %key,
                field = field.unwrap_or(""),
                error = %e,
                "Ignoring undecodable stored value"
            );
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Owned {
        owner: String,
        n: u32,
    }

    fn owned(owner: &str, n: u32) -> Owned {
        Owned {
            owner: owner.to_string(),
            n,
        }
    }

    /// Backend whose every call fails with a connection-level error.
    struct DownBackend;

    #[async_trait::async_trait]
    impl StateBackend for DownBackend {
        fn is_distributed(&self) -> bool {
            true
        }
        async fn get(&self, _: &str) -> Result<Option<String>, BoardError> {
            Err(BoardError::StoreUnavailable("down".into()))
        }
        async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<(), BoardError> {
            Err(BoardError::StoreUnavailable("down".into()))
        }
        async fn set_if_absent(
            &self,
            _: &str,
            _: &str,
            _: Option<Duration>,
        ) -> Result<bool, BoardError> {
            Err(BoardError::StoreUnavailable("down".into()))
        }
        async fn delete(&self, _: &str) -> Result<(), BoardError> {
            Err(BoardError::StoreUnavailable("down".into()))
        }
        async fn exists(&self, _: &str) -> Result<bool, BoardError> {
            Err(BoardError::StoreUnavailable("down".into()))
        }
        async fn scan_keys(&self, _: &str) -> Result<Vec<String>, BoardError> {
            Err(BoardError::StoreUnavailable("down".into()))
        }
        async fn hget_all(&self, _: &str) -> Result<Vec<(String, String)>, BoardError> {
            Err(BoardError::StoreUnavailable("down".into()))
        }
        async fn hget(&self, _: &str, _: &str) -> Result<Option<String>, BoardError> {
            Err(BoardError::StoreUnavailable("down".into()))
        }
        async fn hset(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: Option<Duration>,
        ) -> Result<(), BoardError> {
            Err(BoardError::StoreUnavailable("down".into()))
        }
        async fn hset_if_absent(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: Option<Duration>,
        ) -> Result<bool, BoardError> {
            Err(BoardError::StoreUnavailable("down".into()))
        }
        async fn hdel(&self, _: &str, _: &str) -> Result<(), BoardError> {
            Err(BoardError::StoreUnavailable("down".into()))
        }
    }

    #[test]
    fn test_ttl_seconds_rounds_up_with_minimum() {
        assert_eq!(ttl_seconds(Duration::from_millis(0)), 1);
        assert_eq!(ttl_seconds(Duration::from_millis(1)), 1);
        assert_eq!(ttl_seconds(Duration::from_millis(1000)), 1);
        assert_eq!(ttl_seconds(Duration::from_millis(1001)), 2);
        assert_eq!(ttl_seconds(Duration::from_secs(15)), 15);
    }

    #[tokio::test]
    async fn test_value_round_trip() {
        let state = DistributedState::in_memory();
        state
            .set_value("k", &owned("node-a", 1), Some(Duration::from_secs(5)))
            .await
            .unwrap();

        let read: Option<Owned> = state.get_value("k").await.unwrap();
        assert_eq!(read, Some(owned("node-a", 1)));
    }

    #[tokio::test]
    async fn test_get_value_checked_evicts_stale() {
        let state = DistributedState::in_memory();
        state.set_value("k", &owned("dead", 1), None).await.unwrap();

        let read: Option<Owned> = state
            .get_value_checked("k", |v: &Owned| {
                let stale = v.owner == "dead";
                async move { stale }
            })
            .await
            .unwrap();

        assert_eq!(read, None);
        assert!(!state.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_value_checked_keeps_live() {
        let state = DistributedState::in_memory();
        state.set_value("k", &owned("alive", 1), None).await.unwrap();

        let read: Option<Owned> = state
            .get_value_checked("k", |_: &Owned| async { false })
            .await
            .unwrap();
        assert_eq!(read, Some(owned("alive", 1)));
    }

    #[tokio::test]
    async fn test_undecodable_value_reads_as_absent() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set("k", "{not json", None).await.unwrap();
        let state = DistributedState::new(backend);

        let read: Option<Owned> = state.get_value("k").await.unwrap();
        assert_eq!(read, None);
    }

    #[tokio::test]
    async fn test_set_value_if_absent() {
        let state = DistributedState::in_memory();
        assert!(state
            .set_value_if_absent("k", &owned("a", 1), None)
            .await
            .unwrap());
        assert!(!state
            .set_value_if_absent("k", &owned("b", 2), None)
            .await
            .unwrap());

        let read: Option<Owned> = state.get_value("k").await.unwrap();
        assert_eq!(read.unwrap().owner, "a");
    }

    #[tokio::test]
    async fn test_hash_checked_deletes_only_stale_fields() {
        let state = DistributedState::in_memory();
        state
            .set_hash_entry("h", "u1", &owned("alive", 1), None)
            .await
            .unwrap();
        state
            .set_hash_entry("h", "u2", &owned("dead", 2), None)
            .await
            .unwrap();

        let checks = AtomicUsize::new(0);
        let live: Vec<(String, Owned)> = state
            .get_hash_checked("h", |_field, v: &Owned| {
                checks.fetch_add(1, Ordering::SeqCst);
                let stale = v.owner == "dead";
                async move { stale }
            })
            .await
            .unwrap();

        assert_eq!(checks.load(Ordering::SeqCst), 2);
        assert_eq!(live, vec![("u1".to_string(), owned("alive", 1))]);

        let u2: Option<Owned> = state.get_hash_entry("h", "u2").await.unwrap();
        assert_eq!(u2, None);
    }

    #[tokio::test]
    async fn test_hash_entry_checked() {
        let state = DistributedState::in_memory();
        state
            .set_hash_entry("h", "u1", &owned("dead", 1), None)
            .await
            .unwrap();

        let read: Option<Owned> = state
            .get_hash_entry_checked("h", "u1", |_: &Owned| async { true })
            .await
            .unwrap();
        assert_eq!(read, None);
        assert!(!state.exists("h").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_keys() {
        let state = DistributedState::in_memory();
        state.set_value("room:a:syncer", &1, None).await.unwrap();
        state
            .set_hash_entry("room:a:recordings", "u", &1, None)
            .await
            .unwrap();

        assert_eq!(
            state.list_value_keys("room:*:syncer").await.unwrap(),
            vec!["room:a:syncer"]
        );
        assert_eq!(
            state.list_hash_keys("room:*:recordings").await.unwrap(),
            vec!["room:a:recordings"]
        );
    }

    #[tokio::test]
    async fn test_outage_is_swallowed_for_reads_and_writes() {
        let state = DistributedState::new(Arc::new(DownBackend));

        let read: Option<Owned> = state.get_value("k").await.unwrap();
        assert_eq!(read, None);
        state.set_value("k", &owned("a", 1), None).await.unwrap();
        state.delete_value("k").await.unwrap();
        assert!(state.list_value_keys("*").await.unwrap().is_empty());

        let hash: Vec<(String, Owned)> = state.get_hash("h").await.unwrap();
        assert!(hash.is_empty());
        state
            .set_hash_entry("h", "f", &owned("a", 1), None)
            .await
            .unwrap();
        state.delete_hash_entry("h", "f").await.unwrap();
    }

    #[tokio::test]
    async fn test_outage_propagates_for_conditional_write_and_exists() {
        let state = DistributedState::new(Arc::new(DownBackend));

        let err = state
            .set_value_if_absent("k", &owned("a", 1), None)
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(state.exists("k").await.unwrap_err().is_unavailable());

        let err = state
            .set_hash_entry_if_absent("h", "f", &owned("a", 1), None)
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_hash_entry_if_absent_keeps_first_writer() {
        let state = DistributedState::in_memory();
        assert!(state
            .set_hash_entry_if_absent("h", "u1", &owned("a", 1), None)
            .await
            .unwrap());
        assert!(!state
            .set_hash_entry_if_absent("h", "u1", &owned("b", 2), None)
            .await
            .unwrap());
        assert!(state
            .set_hash_entry_if_absent("h", "u2", &owned("c", 3), None)
            .await
            .unwrap());

        let u1: Option<Owned> = state.get_hash_entry("h", "u1").await.unwrap();
        assert_eq!(u1, Some(owned("a", 1)));
    }
}
