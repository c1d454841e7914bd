//! Integration tests for node heartbeats as seen by other nodes.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use board_service::presence::{heartbeat_key, LivenessProbe, NodePresence};
use board_service::store::{DistributedState, MemoryBackend};
use board_test_utils::TestCluster;
use common::types::NodeId;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_running_node_is_alive_to_its_peers() {
    let cluster = TestCluster::new();
    let node_a = cluster.spawn_node("node-a").await;
    let node_b = cluster.spawn_node("node-b").await;

    assert!(node_a.node.presence.is_alive(node_b.id()).await);
    assert!(node_b.node.presence.is_alive(node_a.id()).await);
    assert!(!node_a.node.presence.is_alive(&NodeId::new("never-started")).await);
}

#[tokio::test]
async fn test_crashed_node_is_dead_to_its_peers() {
    let cluster = TestCluster::new();
    let node_a = cluster.spawn_node("node-a").await;
    let node_b = cluster.spawn_node("node-b").await;
    let b_id = node_b.id().clone();

    node_b.crash().await;

    assert!(!node_a.node.presence.is_alive(&b_id).await);
    assert!(!cluster.state.exists(&heartbeat_key(&b_id)).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_survives_many_ttls_until_stopped() {
    let state = DistributedState::new(Arc::new(MemoryBackend::shared()));
    let ttl = Duration::from_secs(6);
    let writer = NodePresence::new(NodeId::new("writer"), state.clone(), ttl);
    let observer = NodePresence::new(NodeId::new("observer"), state.clone(), ttl);

    writer.start().await.unwrap();

    // Several TTLs pass; the refresh loop keeps the key alive.
    tokio::time::sleep(ttl * 3).await;
    assert!(observer.is_alive(&NodeId::new("writer")).await);

    writer.stop().await;
    assert!(!observer.is_alive(&NodeId::new("writer")).await);
}

#[tokio::test(start_paused = true)]
async fn test_unrefreshed_heartbeat_expires_after_ttl() {
    let state = DistributedState::new(Arc::new(MemoryBackend::shared()));
    let ttl = Duration::from_secs(6);
    let observer = NodePresence::new(NodeId::new("observer"), state.clone(), ttl);
    let key = heartbeat_key(&NodeId::new("ghost"));

    state
        .set_value(&key, &serde_json::json!({"nodeId": "ghost", "timestamp": 0}), Some(ttl))
        .await
        .unwrap();
    assert!(observer.is_alive(&NodeId::new("ghost")).await);

    tokio::time::advance(ttl + Duration::from_millis(1)).await;
    assert!(!observer.is_alive(&NodeId::new("ghost")).await);
}

#[tokio::test]
async fn test_in_process_store_treats_every_node_as_alive() {
    let presence = NodePresence::new(
        NodeId::new("solo"),
        DistributedState::in_memory(),
        Duration::from_secs(6),
    );

    assert!(presence.is_alive(&NodeId::new("unknown")).await);
}
