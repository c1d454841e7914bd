//! In-process store backend.
//!
//! Used when no Redis URL is configured, and by tests. Expiry uses
//! `tokio::time::Instant`, so paused-time tests can drive TTLs with
//! `tokio::time::advance`. Expired keys are purged lazily on access.

use crate::errors::BoardError;
use crate::store::pattern::KeyPattern;
use crate::store::StateBackend;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

enum Data {
    Value(String),
    Hash(HashMap<String, String>),
}

struct Slot {
    data: Data,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Map-backed [`StateBackend`].
///
/// All operations take one async mutex, which makes `set_if_absent` atomic.
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Slot>>,
    distributed: bool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Process-private store. Reports `is_distributed() == false`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            distributed: false,
        }
    }

    /// Store shared by several in-process nodes.
    ///
    /// Reports `is_distributed() == true` so heartbeat liveness is enforced,
    /// which lets one process simulate a multi-node cluster.
    #[must_use]
    pub fn shared() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            distributed: true,
        }
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|slot| !slot.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn deadline(ttl: Option<Duration>) -> Option<Instant> {
    ttl.map(|ttl| Instant::now() + ttl)
}

fn purge_if_expired(entries: &mut HashMap<String, Slot>, key: &str) {
    let now = Instant::now();
    if entries.get(key).is_some_and(|slot| slot.is_expired(now)) {
        entries.remove(key);
    }
}

fn wrong_type(key: &str) -> BoardError {
    BoardError::Store(format!(
        "WRONGTYPE operation against key {key} holding the wrong kind of value"
    ))
}

#[async_trait::async_trait]
impl StateBackend for MemoryBackend {
    fn is_distributed(&self) -> bool {
        self.distributed
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BoardError> {
        let mut entries = self.entries.lock().await;
        purge_if_expired(&mut entries, key);

        match entries.get(key).map(|slot| &slot.data) {
            None => Ok(None),
            Some(Data::Value(value)) => Ok(Some(value.clone())),
            Some(Data::Hash(_)) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), BoardError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Slot {
                data: Data::Value(value.to_string()),
                expires_at: deadline(ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, BoardError> {
        let mut entries = self.entries.lock().await;
        purge_if_expired(&mut entries, key);

        if entries.contains_key(key) {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Slot {
                data: Data::Value(value.to_string()),
                expires_at: deadline(ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), BoardError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, BoardError> {
        let mut entries = self.entries.lock().await;
        purge_if_expired(&mut entries, key);
        Ok(entries.contains_key(key))
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, BoardError> {
        let pattern = KeyPattern::new(pattern);
        let now = Instant::now();

        let mut entries = self.entries.lock().await;
        entries.retain(|_, slot| !slot.is_expired(now));

        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn hget_all(&self, key: &str) -> Result<Vec<(String, String)>, BoardError> {
        let mut entries = self.entries.lock().await;
        purge_if_expired(&mut entries, key);

        match entries.get(key).map(|slot| &slot.data) {
            None => Ok(Vec::new()),
            Some(Data::Hash(fields)) => {
                let mut all: Vec<(String, String)> = fields
                    .iter()
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect();
                all.sort_by(|a, b| a.0.cmp(&b.0));
                Ok(all)
            }
            Some(Data::Value(_)) => Err(wrong_type(key)),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, BoardError> {
        let mut entries = self.entries.lock().await;
        purge_if_expired(&mut entries, key);

        match entries.get(key).map(|slot| &slot.data) {
            None => Ok(None),
            Some(Data::Hash(fields)) => Ok(fields.get(field).cloned()),
            Some(Data::Value(_)) => Err(wrong_type(key)),
        }
    }

    async fn hset(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), BoardError> {
        let mut entries = self.entries.lock().await;
        purge_if_expired(&mut entries, key);

        let slot = entries.entry(key.to_string()).or_insert_with(|| Slot {
            data: Data::Hash(HashMap::new()),
            expires_at: None,
        });

        match &mut slot.data {
            Data::Hash(fields) => {
                fields.insert(field.to_string(), value.to_string());
            }
            Data::Value(_) => return Err(wrong_type(key)),
        }

        if ttl.is_some() {
            slot.expires_at = deadline(ttl);
        }
        Ok(())
    }

    async fn hset_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, BoardError> {
        let mut entries = self.entries.lock().await;
        purge_if_expired(&mut entries, key);

        let slot = entries.entry(key.to_string()).or_insert_with(|| Slot {
            data: Data::Hash(HashMap::new()),
            expires_at: None,
        });

        match &mut slot.data {
            Data::Hash(fields) if fields.contains_key(field) => return Ok(false),
            Data::Hash(fields) => {
                fields.insert(field.to_string(), value.to_string());
            }
            Data::Value(_) => return Err(wrong_type(key)),
        }

        if ttl.is_some() {
            slot.expires_at = deadline(ttl);
        }
        Ok(true)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), BoardError> {
        let mut entries = self.entries.lock().await;
        purge_if_expired(&mut entries, key);

        let now_empty = match entries.get_mut(key).map(|slot| &mut slot.data) {
            None => return Ok(()),
            Some(Data::Hash(fields)) => {
                fields.remove(field);
                fields.is_empty()
            }
            Some(Data::Value(_)) => return Err(wrong_type(key)),
        };

        if now_empty {
            entries.remove(key);
        }
        Ok(())
    }
}
