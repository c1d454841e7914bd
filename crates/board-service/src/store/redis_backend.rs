//! Redis store backend.
//!
//! # Key Patterns
//!
//! - `room:{id}:presentation` - Presentation session (JSON value)
//! - `room:{id}:syncer` - Syncer assignment (JSON value, written with `SET NX`)
//! - `room:{id}:recordings` - Recording entries (HASH, field = user id)
//! - `room:{id}:members` - Member records (HASH, field = socket id)
//! - `node:{id}:heartbeat` - Node liveness (JSON value with TTL)
//!
//! # Connection Pattern
//!
//! The redis-rs `MultiplexedConnection` is cheap to clone and safe to use
//! concurrently, so every operation clones it instead of sharing a lock.

use crate::errors::BoardError;
use crate::observability::metrics;
use crate::store::{lua_scripts, ttl_seconds, StateBackend};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Keys requested per `SCAN` round trip.
const SCAN_BATCH_SIZE: usize = 200;

/// Redis-backed [`StateBackend`].
///
/// Cheaply cloneable; clones share the multiplexed connection.
#[derive(Clone)]
pub struct RedisBackend {
    client: Client,
    connection: MultiplexedConnection,
    hset_script: Script,
    hsetnx_script: Script,
    hdel_script: Script,
}

impl RedisBackend {
    /// Open a client and establish the shared multiplexed connection.
    ///
    /// # Errors
    ///
    /// Returns `BoardError::StoreUnavailable` if the server cannot be reached
    /// and `BoardError::Config` if the URL is malformed.
    pub async fn connect(redis_url: &str) -> Result<Self, BoardError> {
        let client = Client::open(redis_url).map_err(|e| {
            // Do NOT log redis_url, it may contain credentials
            error!(
                target: "board.store.redis",
                error = %e,
                "Failed to open Redis client"
            );
            BoardError::Config(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(
                    target: "board.store.redis",
                    error = %e,
                    "Failed to connect to Redis"
                );
                BoardError::StoreUnavailable(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self {
            client,
            connection,
            hset_script: Script::new(lua_scripts::HSET_WITH_TTL),
            hsetnx_script: Script::new(lua_scripts::HSETNX_WITH_TTL),
            hdel_script: Script::new(lua_scripts::HDEL_AND_CLEANUP),
        })
    }

    /// Underlying client, used to open dedicated pub/sub connections.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Clone of the shared multiplexed connection.
    pub fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

/// Connection-level failures that callers treat as a temporary outage.
pub(crate) fn is_unavailable_error(e: &RedisError) -> bool {
    e.is_connection_dropped() || e.is_io_error() || e.is_connection_refusal() || e.is_timeout()
}

pub(crate) fn map_redis_error(operation: &'static str, key: &str, e: &RedisError) -> BoardError {
    debug!(
        target: "board.store.redis",
        error = %e,
        operation = operation,
        key = %key,
        "Redis operation failed"
    );
    if is_unavailable_error(e) {
        BoardError::StoreUnavailable(format!("{operation} failed: {e}"))
    } else {
        BoardError::Store(format!("{operation} failed: {e}"))
    }
}

async fn timed<T>(operation: &'static str, fut: impl Future<Output = T>) -> T {
    let start = Instant::now();
    let out = fut.await;
    metrics::record_store_latency(operation, start.elapsed());
    out
}

#[async_trait::async_trait]
impl StateBackend for RedisBackend {
    fn is_distributed(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BoardError> {
        let mut conn = self.connection.clone();
        timed("get", conn.get(key))
            .await
            .map_err(|e| map_redis_error("get", key, &e))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), BoardError> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl_seconds(ttl));
        }

        let _: () = timed("set", cmd.query_async(&mut conn))
            .await
            .map_err(|e| map_redis_error("set", key, &e))?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, BoardError> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl_seconds(ttl));
        }

        // SET NX replies OK on success and nil when the key already exists
        let reply: Option<String> = timed("set_nx", cmd.query_async(&mut conn))
            .await
            .map_err(|e| map_redis_error("set_nx", key, &e))?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), BoardError> {
        let mut conn = self.connection.clone();
        let _: i64 = timed("del", conn.del(key))
            .await
            .map_err(|e| map_redis_error("del", key, &e))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, BoardError> {
        let mut conn = self.connection.clone();
        timed("exists", conn.exists(key))
            .await
            .map_err(|e| map_redis_error("exists", key, &e))
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, BoardError> {
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = timed(
                "scan",
                redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH_SIZE)
                    .query_async(&mut conn),
            )
            .await
            .map_err(|e| map_redis_error("scan", pattern, &e))?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn hget_all(&self, key: &str) -> Result<Vec<(String, String)>, BoardError> {
        let mut conn = self.connection.clone();
        let fields: HashMap<String, String> = timed("hgetall", conn.hgetall(key))
            .await
            .map_err(|e| map_redis_error("hgetall", key, &e))?;

        let mut all: Vec<(String, String)> = fields.into_iter().collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(all)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, BoardError> {
        let mut conn = self.connection.clone();
        timed("hget", conn.hget(key, field))
            .await
            .map_err(|e| map_redis_error("hget", key, &e))
    }

    async fn hset(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), BoardError> {
        let mut conn = self.connection.clone();
        let ttl_arg = ttl.map_or(0, ttl_seconds);

        let _: i64 = timed(
            "hset",
            self.hset_script
                .key(key)
                .arg(field)
                .arg(value)
                .arg(ttl_arg)
                .invoke_async(&mut conn),
        )
        .await
        .map_err(|e| map_redis_error("hset", key, &e))?;
        Ok(())
    }

    async fn hset_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, BoardError> {
        let mut conn = self.connection.clone();
        let ttl_arg = ttl.map_or(0, ttl_seconds);

        let created: i64 = timed(
            "hsetnx",
            self.hsetnx_script
                .key(key)
                .arg(field)
                .arg(value)
                .arg(ttl_arg)
                .invoke_async(&mut conn),
        )
        .await
        .map_err(|e| map_redis_error("hsetnx", key, &e))?;
        Ok(created == 1)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), BoardError> {
        let mut conn = self.connection.clone();
        let _: i64 = timed(
            "hdel",
            self.hdel_script.key(key).arg(field).invoke_async(&mut conn),
        )
        .await
        .map_err(|e| map_redis_error("hdel", key, &e))?;
        Ok(())
    }
}
