//! Node presence: per-process heartbeat and liveness queries.
//!
//! Each node keeps `node:{id}:heartbeat` alive with a TTL and rewrites it every
//! `max(1s, ttl / 3)`. A node whose key has expired is dead, and every record it
//! owns becomes stale (see [`crate::cluster`]).
//!
//! # Graceful Shutdown
//!
//! [`NodePresence::stop`] cancels the heartbeat task and deletes the key so
//! other nodes treat this node as dead immediately instead of after the TTL.

use crate::errors::BoardError;
use crate::store::DistributedState;
use common::types::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Floor for the heartbeat write interval.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

pub fn heartbeat_key(node_id: &NodeId) -> String {
    format!("node:{node_id}:heartbeat")
}

/// Heartbeat write period for a given TTL: `max(1s, ttl / 3)`.
pub fn heartbeat_interval(ttl: Duration) -> Duration {
    (ttl / 3).max(MIN_HEARTBEAT_INTERVAL)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Heartbeat {
    node_id: NodeId,
    timestamp: i64,
}

/// Answers whether the node owning a record is still running.
///
/// Injected into [`crate::cluster::ClusterService`] so staleness can be faked in tests.
#[async_trait::async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn is_alive(&self, node_id: &NodeId) -> bool;
}

/// Heartbeat publisher and liveness probe for one node.
pub struct NodePresence {
    node_id: NodeId,
    state: DistributedState,
    ttl: Duration,
    cancel_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NodePresence {
    pub fn new(node_id: NodeId, state: DistributedState, ttl: Duration) -> Self {
        Self {
            node_id,
            state,
            ttl,
            cancel_token: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Write the heartbeat now, then keep refreshing it on a background task.
    ///
    /// Calling `start` on a running presence is a no-op.
    #[instrument(skip_all, fields(node_id = %self.node_id))]
    pub async fn start(&self) -> Result<(), BoardError> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Ok(());
        }

        write_heartbeat(&self.state, &self.node_id, self.ttl).await?;

        let state = self.state.clone();
        let node_id = self.node_id.clone();
        let ttl = self.ttl;
        let cancel_token = self.cancel_token.child_token();
        *task = Some(tokio::spawn(async move {
            run_heartbeat_loop(state, node_id, ttl, cancel_token).await;
        }));

        info!(
            target: "board.presence",
            node_id = %self.node_id,
            ttl_ms = self.ttl.as_millis(),
            interval_ms = heartbeat_interval(self.ttl).as_millis(),
            "Node heartbeat started"
        );
        Ok(())
    }

    /// Stop heartbeating and delete the key (best effort).
    #[instrument(skip_all, fields(node_id = %self.node_id))]
    pub async fn stop(&self) {
        self.cancel_token.cancel();

        if let Some(handle) = self.task.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(target: "board.presence", error = %e, "Heartbeat task ended abnormally");
            }
        }

        if let Err(e) = self.state.delete_value(&heartbeat_key(&self.node_id)).await {
            warn!(
                target: "board.presence",
                error = %e,
                "Failed to delete heartbeat key on stop"
            );
        }

        info!(target: "board.presence", node_id = %self.node_id, "Node heartbeat stopped");
    }
}

#[async_trait::async_trait]
impl LivenessProbe for NodePresence {
    /// Without a shared backend every node is assumed alive; the local node
    /// is always alive to itself.
    async fn is_alive(&self, node_id: &NodeId) -> bool {
        if !self.state.is_distributed() || *node_id == self.node_id {
            return true;
        }

        match self.state.exists(&heartbeat_key(node_id)).await {
            Ok(alive) => alive,
            Err(e) => {
                // An outage must not make every remote record look orphaned.
                warn!(
                    target: "board.presence",
                    node_id = %node_id,
                    error = %e,
                    "Liveness check failed, assuming node alive"
                );
                true
            }
        }
    }
}

async fn write_heartbeat(
    state: &DistributedState,
    node_id: &NodeId,
    ttl: Duration,
) -> Result<(), BoardError> {
    let beat = Heartbeat {
        node_id: node_id.clone(),
        timestamp: chrono::Utc::now().timestamp_millis(),
    };
    state
        .set_value(&heartbeat_key(node_id), &beat, Some(ttl))
        .await
}

/// Refresh the heartbeat every `heartbeat_interval(ttl)` until cancelled.
///
/// The first write happens one interval after the call; [`NodePresence::start`]
/// performs the initial write itself.
pub async fn run_heartbeat_loop(
    state: DistributedState,
    node_id: NodeId,
    ttl: Duration,
    cancel_token: CancellationToken,
) {
    let period = heartbeat_interval(ttl);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!(target: "board.presence", "Heartbeat loop cancelled");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = write_heartbeat(&state, &node_id, ttl).await {
                    warn!(
                        target: "board.presence",
                        node_id = %node_id,
                        error = %e,
                        "Heartbeat write failed"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use std::sync::Arc;

    fn shared_state() -> DistributedState {
        DistributedState::new(Arc::new(MemoryBackend::shared()))
    }

    #[test]
    fn test_heartbeat_interval() {
        assert_eq!(
            heartbeat_interval(Duration::from_secs(15)),
            Duration::from_secs(5)
        );
        assert_eq!(
            heartbeat_interval(Duration::from_millis(1500)),
            MIN_HEARTBEAT_INTERVAL
        );
    }

    #[test]
    fn test_heartbeat_key() {
        assert_eq!(heartbeat_key(&NodeId::new("n1")), "node:n1:heartbeat");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_writes_immediately_and_keeps_key_alive() {
        let state = shared_state();
        let presence = NodePresence::new(NodeId::new("n1"), state.clone(), Duration::from_secs(3));
        let key = heartbeat_key(&NodeId::new("n1"));

        presence.start().await.unwrap();
        assert!(state.exists(&key).await.unwrap());

        // well past the 3s TTL: refreshed every 1s
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(state.exists(&key).await.unwrap());

        presence.stop().await;
        assert!(!state.exists(&key).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_expires_after_heartbeat_loop_is_cancelled() {
        let state = shared_state();
        let node = NodeId::new("n1");
        let key = heartbeat_key(&node);
        let ttl = Duration::from_secs(3);
        let cancel_token = CancellationToken::new();

        write_heartbeat(&state, &node, ttl).await.unwrap();
        let handle = tokio::spawn(run_heartbeat_loop(
            state.clone(),
            node.clone(),
            ttl,
            cancel_token.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel_token.cancel();
        handle.await.unwrap();

        // last write happened at t=2s
        tokio::time::sleep(Duration::from_millis(2400)).await;
        assert!(state.exists(&key).await.unwrap());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!state.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_is_alive_checks_heartbeat_on_shared_backend() {
        let state = shared_state();
        let local = NodePresence::new(NodeId::new("local"), state.clone(), Duration::from_secs(15));
        let remote = NodePresence::new(NodeId::new("remote"), state.clone(), Duration::from_secs(15));

        assert!(local.is_alive(&NodeId::new("local")).await);
        assert!(!local.is_alive(&NodeId::new("remote")).await);

        remote.start().await.unwrap();
        assert!(local.is_alive(&NodeId::new("remote")).await);

        remote.stop().await;
        assert!(!local.is_alive(&NodeId::new("remote")).await);
    }

    #[tokio::test]
    async fn test_is_alive_without_distributed_backend() {
        let presence = NodePresence::new(
            NodeId::new("local"),
            DistributedState::in_memory(),
            Duration::from_secs(15),
        );
        assert!(presence.is_alive(&NodeId::new("never-heartbeated")).await);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let state = shared_state();
        let presence = NodePresence::new(NodeId::new("n1"), state, Duration::from_secs(15));

        presence.start().await.unwrap();
        presence.start().await.unwrap();
        presence.stop().await;
    }
}
