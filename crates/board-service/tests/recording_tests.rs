//! Integration tests for recording control and cross-node stop forwarding.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use board_service::cluster::{RecordingEntry, RecordingStatus};
use board_service::errors::BoardError;
use board_service::events::{ClientEvent, ServerEvent};
use board_service::recording::{StopOutcome, HOST_UNAVAILABLE_MESSAGE};
use board_test_utils::{TestCluster, TestUser, TEST_FORWARD_TIMEOUT};
use common::types::{NodeId, RoomId, UserId};

const ROOM: &str = "standup";

fn room() -> RoomId {
    RoomId::new(ROOM)
}

#[tokio::test]
async fn test_start_and_stop_locally() {
    let cluster = TestCluster::new();
    let node = cluster.spawn_node("node-a").await;
    let mut alice = node.connect(&TestUser::new("alice")).await;
    node.join(&alice, ROOM).await;
    alice.drain();

    node.node
        .recordings
        .start_recording(&alice.id, ROOM, "upload-1")
        .await
        .unwrap();

    let entry = node
        .node
        .cluster
        .get_recording_entry(&room(), &UserId::new("alice"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, RecordingStatus::Recording);
    assert_eq!(entry.node_id, NodeId::new("node-a"));
    assert_eq!(node.capture.active(), 1);
    assert!(alice.wait_for_named("user-started-recording").await.is_some());

    let outcome = node
        .node
        .recordings
        .stop_recording(&alice.id, ROOM, None)
        .await
        .unwrap();

    assert_eq!(outcome, StopOutcome::StoppedLocally);
    assert_eq!(node.capture.stopped(), 1);
    assert!(alice.wait_for_named("recording-stopped").await.is_some());
    assert!(node
        .node
        .cluster
        .get_recording_state(&room())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_second_start_for_same_user_conflicts() {
    let cluster = TestCluster::new();
    let node = cluster.spawn_node("node-a").await;
    let alice = node.connect(&TestUser::new("alice")).await;
    node.join(&alice, ROOM).await;

    let recordings = &node.node.recordings;
    recordings.start_recording(&alice.id, ROOM, "upload-1").await.unwrap();
    let err = recordings
        .start_recording(&alice.id, ROOM, "upload-2")
        .await
        .unwrap_err();

    assert!(matches!(err, BoardError::Conflict(_)));
    assert_eq!(node.capture.started(), 1);
}

#[tokio::test]
async fn test_concurrent_starts_for_same_user_run_one_capture() {
    let cluster = TestCluster::new();
    let node_a = cluster.spawn_node("node-a").await;
    let node_b = cluster.spawn_node("node-b").await;
    let alice = TestUser::new("alice");

    let on_a = node_a.connect(&alice).await;
    let on_b = node_b.connect(&alice).await;
    node_a.join(&on_a, ROOM).await;
    node_b.join(&on_b, ROOM).await;

    let (first, second) = tokio::join!(
        node_a
            .node
            .recordings
            .start_recording(&on_a.id, ROOM, "upload-a"),
        node_b
            .node
            .recordings
            .start_recording(&on_b.id, ROOM, "upload-b"),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(BoardError::Conflict(_)))));
    assert_eq!(node_a.capture.started() + node_b.capture.started(), 1);

    let entries = node_a.node.cluster.get_recording_state(&room()).await.unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_capture_failure_leaves_no_entry() {
    let cluster = TestCluster::new();
    let node = cluster.spawn_node("node-a").await;
    let alice = node.connect(&TestUser::new("alice")).await;
    node.join(&alice, ROOM).await;

    node.capture.fail_next();
    let err = node
        .node
        .recordings
        .start_recording(&alice.id, ROOM, "upload-1")
        .await
        .unwrap_err();

    assert!(matches!(err, BoardError::Capture(_)));
    assert!(node
        .node
        .cluster
        .get_recording_entry(&room(), &UserId::new("alice"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_read_only_user_gets_recording_error() {
    let cluster = TestCluster::new();
    let node = cluster.spawn_node("node-a").await;
    let mut viewer = node.connect(&TestUser::new("viewer").read_only()).await;
    node.join(&viewer, ROOM).await;
    viewer.drain();

    node.send(
        &viewer,
        ClientEvent::StartRecording {
            room_id: ROOM.to_string(),
            upload_token: "upload-1".to_string(),
        },
    )
    .await;

    assert!(viewer.wait_for_named("recording-error").await.is_some());
    assert_eq!(node.capture.started(), 0);
}

#[tokio::test]
async fn test_start_requires_room_membership() {
    let cluster = TestCluster::new();
    let node = cluster.spawn_node("node-a").await;
    let alice = node.connect(&TestUser::new("alice")).await;

    let result = node
        .node
        .recordings
        .start_recording(&alice.id, ROOM, "upload-1")
        .await;

    assert!(result.is_err());
    assert_eq!(node.capture.started(), 0);
}

#[tokio::test]
async fn test_joiner_is_told_about_running_recordings() {
    let cluster = TestCluster::new();
    let node_a = cluster.spawn_node("node-a").await;
    let node_b = cluster.spawn_node("node-b").await;

    let alice = node_a.connect(&TestUser::new("alice")).await;
    node_a.join(&alice, ROOM).await;
    node_a
        .node
        .recordings
        .start_recording(&alice.id, ROOM, "upload-1")
        .await
        .unwrap();

    let mut bob = node_b.connect(&TestUser::new("bob")).await;
    node_b.join(&bob, ROOM).await;

    let started = bob.wait_for_named("user-started-recording").await.unwrap();
    let ServerEvent::UserStartedRecording(notice) = started else {
        panic!("expected user-started-recording");
    };
    assert_eq!(notice.user_id, UserId::new("alice"));
    assert_eq!(notice.status, RecordingStatus::Recording);
}

#[tokio::test]
async fn test_stop_is_forwarded_to_the_recording_node() {
    let cluster = TestCluster::new();
    let node_a = cluster.spawn_node("node-a").await;
    let node_b = cluster.spawn_node("node-b").await;

    let mut alice = node_a.connect(&TestUser::new("alice")).await;
    let bob = node_b.connect(&TestUser::new("bob")).await;
    node_a.join(&alice, ROOM).await;
    node_b.join(&bob, ROOM).await;
    node_b
        .node
        .recordings
        .start_recording(&bob.id, ROOM, "upload-bob")
        .await
        .unwrap();

    let outcome = node_a
        .node
        .recordings
        .stop_recording(&alice.id, ROOM, Some(UserId::new("bob")))
        .await
        .unwrap();

    assert_eq!(outcome, StopOutcome::Forwarded);
    assert_eq!(node_b.capture.stopped(), 1);
    assert!(node_a
        .node
        .cluster
        .get_recording_entry(&room(), &UserId::new("bob"))
        .await
        .unwrap()
        .is_none());

    // The confirmation comes from node B, relayed to alice's socket on node A.
    assert!(alice.wait_for_named("recording-stopped").await.is_some());
}

#[tokio::test]
async fn test_unclaimed_forward_times_out_and_clears_entry() {
    let cluster = TestCluster::new();
    let node_a = cluster.spawn_node("node-a").await;
    let node_b = cluster.spawn_node("node-b").await;

    let mut alice = node_a.connect(&TestUser::new("alice")).await;
    node_a.join(&alice, ROOM).await;

    // Node B is alive but holds no capture session for this entry.
    let orphan = RecordingEntry {
        user_id: UserId::new("bob"),
        username: "bob".to_string(),
        upload_token: "upload-bob".to_string(),
        status: RecordingStatus::Recording,
        node_id: node_b.id().clone(),
        started_at: 1,
    };
    node_b
        .node
        .cluster
        .set_recording_entry(&room(), &orphan)
        .await
        .unwrap();
    alice.drain();

    let outcome = node_a
        .node
        .recordings
        .stop_recording(&alice.id, ROOM, Some(UserId::new("bob")))
        .await
        .unwrap();

    assert_eq!(outcome, StopOutcome::TimedOut);
    assert!(node_a
        .node
        .cluster
        .get_recording_entry(&room(), &UserId::new("bob"))
        .await
        .unwrap()
        .is_none());

    let events = alice.drain();
    assert!(events.contains(&ServerEvent::UserStoppedRecording {
        user_id: UserId::new("bob"),
    }));
    assert!(events.contains(&ServerEvent::RecordingError {
        message: HOST_UNAVAILABLE_MESSAGE.to_string(),
    }));
}

#[tokio::test]
async fn test_stop_completed_without_claim_reports_no_error() {
    let cluster = TestCluster::new();
    let node_a = cluster.spawn_node("node-a").await;
    let node_b = cluster.spawn_node("node-b").await;

    let mut alice = node_a.connect(&TestUser::new("alice")).await;
    node_a.join(&alice, ROOM).await;

    let entry = RecordingEntry {
        user_id: UserId::new("bob"),
        username: "bob".to_string(),
        upload_token: "upload-bob".to_string(),
        status: RecordingStatus::Recording,
        node_id: node_b.id().clone(),
        started_at: 1,
    };
    node_b
        .node
        .cluster
        .set_recording_entry(&room(), &entry)
        .await
        .unwrap();
    alice.drain();

    // The entry goes away while the stop waits, but no claim is ever published.
    let holder = std::sync::Arc::clone(&node_b.node.cluster);
    let remover = tokio::spawn(async move {
        tokio::time::sleep(TEST_FORWARD_TIMEOUT / 4).await;
        holder
            .remove_recording_entry(&room(), &UserId::new("bob"))
            .await
            .unwrap();
    });

    let outcome = node_a
        .node
        .recordings
        .stop_recording(&alice.id, ROOM, Some(UserId::new("bob")))
        .await
        .unwrap();
    remover.await.unwrap();

    assert_eq!(outcome, StopOutcome::Forwarded);
    let events = alice.drain();
    assert!(!events
        .iter()
        .any(|e| matches!(e, ServerEvent::RecordingError { .. })));
}

#[tokio::test]
async fn test_stop_without_recording_is_not_found() {
    let cluster = TestCluster::new();
    let node = cluster.spawn_node("node-a").await;
    let alice = node.connect(&TestUser::new("alice")).await;
    node.join(&alice, ROOM).await;

    let err = node
        .node
        .recordings
        .stop_recording(&alice.id, ROOM, None)
        .await
        .unwrap_err();

    assert!(matches!(err, BoardError::NotFound(_)));
}

#[tokio::test]
async fn test_read_only_user_cannot_stop_others() {
    let cluster = TestCluster::new();
    let node = cluster.spawn_node("node-a").await;
    let alice = node.connect(&TestUser::new("alice")).await;
    let viewer = node.connect(&TestUser::new("viewer").read_only()).await;
    node.join(&alice, ROOM).await;
    node.join(&viewer, ROOM).await;
    node.node
        .recordings
        .start_recording(&alice.id, ROOM, "upload-1")
        .await
        .unwrap();

    let err = node
        .node
        .recordings
        .stop_recording(&viewer.id, ROOM, Some(UserId::new("alice")))
        .await
        .unwrap_err();

    assert!(matches!(err, BoardError::PermissionDenied(_)));
    assert_eq!(node.capture.active(), 1);
}
