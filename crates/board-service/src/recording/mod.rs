//! Recording control.
//!
//! A capture session lives in the process that started it; its
//! [`RecordingEntry`] in the cluster store names that node. Stop requests that
//! land on another node are relayed over the cluster bus:
//!
//! 1. The receiving node publishes `StopRecording` and waits up to the forward
//!    timeout for a claim.
//! 2. Every node sees the request; only the one whose [`ResourceRegistry`]
//!    holds the session stops it, removes the entry, publishes
//!    `StopRecordingClaimed` and then notifies the requester and the room.
//! 3. Without a claim the origin re-reads the entry. A missing entry means the
//!    holder finished and only the claim was lost. Otherwise the origin removes
//!    the entry itself and tells the requester the host is unavailable.
//!
//! Starts go through [`ClusterService::try_set_recording_entry`], so two
//! sockets of one user racing to record get one capture and one `Conflict`.

pub mod capture;
pub mod forward;
pub mod registry;

pub use capture::{CaptureBackend, LoggingCaptureBackend};
pub use forward::PendingForwards;
pub use registry::{LocalResource, ResourceKind, ResourceRegistry};

use crate::cluster::{ClusterService, RecordingEntry, RecordingStatus};
use crate::errors::BoardError;
use crate::events::ServerEvent;
use crate::observability::metrics;
use crate::rooms::parse_room;
use crate::transport::{Broadcaster, BusMessage, SocketUser};
use common::types::{NodeId, RoomId, SocketId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Sent to the requester when a forwarded stop goes unclaimed.
pub const HOST_UNAVAILABLE_MESSAGE: &str = "recording host unavailable";

/// How a stop request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The session was held by this node.
    StoppedLocally,
    /// Another node stopped the session, with or without a timely claim.
    Forwarded,
    /// Nobody claimed the request; the entry was removed here.
    TimedOut,
}

pub struct RecordingService {
    node_id: NodeId,
    cluster: Arc<ClusterService>,
    broadcaster: Arc<Broadcaster>,
    registry: Arc<ResourceRegistry>,
    capture: Arc<dyn CaptureBackend>,
    pending: PendingForwards,
    forward_timeout: Duration,
}

impl RecordingService {
    pub fn new(
        node_id: NodeId,
        cluster: Arc<ClusterService>,
        broadcaster: Arc<Broadcaster>,
        registry: Arc<ResourceRegistry>,
        capture: Arc<dyn CaptureBackend>,
        forward_timeout: Duration,
    ) -> Self {
        Self {
            node_id,
            cluster,
            broadcaster,
            registry,
            capture,
            pending: PendingForwards::new(),
            forward_timeout,
        }
    }

    /// Start capturing `room_id` for the socket's user.
    #[instrument(skip_all, fields(socket_id = %socket_id))]
    pub async fn start_recording(
        &self,
        socket_id: &SocketId,
        raw_room_id: &str,
        upload_token: &str,
    ) -> Result<(), BoardError> {
        let room_id = parse_room(raw_room_id)?;
        let user = self.member_user(socket_id, &room_id).await?;
        if user.read_only {
            return Err(BoardError::PermissionDenied(
                "read-only users cannot record".to_string(),
            ));
        }
        if upload_token.trim().is_empty() {
            return Err(BoardError::Validation("upload token is required".to_string()));
        }
        if self
            .cluster
            .get_recording_entry(&room_id, &user.user_id)
            .await?
            .is_some()
        {
            return Err(BoardError::Conflict("already recording".to_string()));
        }

        let mut entry = RecordingEntry {
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            upload_token: upload_token.to_string(),
            status: RecordingStatus::Starting,
            node_id: self.node_id.clone(),
            started_at: chrono::Utc::now().timestamp_millis(),
        };
        // The read above evicts stale entries; this write settles concurrent starts
        if !self.cluster.try_set_recording_entry(&room_id, &entry).await? {
            debug!(
                target: "board.recording",
                room_id = %room_id,
                user_id = %user.user_id,
                "Lost recording start to a concurrent request"
            );
            return Err(BoardError::Conflict("already recording".to_string()));
        }

        let handle = match self
            .capture
            .start(&room_id, &user.user_id, upload_token)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                self.cluster
                    .remove_recording_entry(&room_id, &user.user_id)
                    .await?;
                return Err(e);
            }
        };

        let kind = ResourceKind::Recording(user.user_id.clone());
        if let Some(previous) = self.registry.insert(room_id.clone(), kind, handle).await {
            previous.release().await;
        }

        entry.status = RecordingStatus::Recording;
        if let Err(e) = self.cluster.set_recording_entry(&room_id, &entry).await {
            self.release_handle(&room_id, &user.user_id).await;
            self.cluster
                .remove_recording_entry(&room_id, &user.user_id)
                .await?;
            return Err(e);
        }

        info!(
            target: "board.recording",
            room_id = %room_id,
            user_id = %user.user_id,
            "Recording started"
        );
        self.broadcaster
            .emit_to_room(&room_id, ServerEvent::UserStartedRecording(entry.notice()), None)
            .await;
        Ok(())
    }

    /// Stop the recording of `target` (default: the requester) wherever it runs.
    #[instrument(skip_all, fields(socket_id = %socket_id))]
    pub async fn stop_recording(
        &self,
        socket_id: &SocketId,
        raw_room_id: &str,
        target: Option<UserId>,
    ) -> Result<StopOutcome, BoardError> {
        let room_id = parse_room(raw_room_id)?;
        let user = self.member_user(socket_id, &room_id).await?;
        let target = target.unwrap_or_else(|| user.user_id.clone());
        if target != user.user_id && user.read_only {
            return Err(BoardError::PermissionDenied(
                "read-only users cannot stop other recordings".to_string(),
            ));
        }

        let Some(mut entry) = self.cluster.get_recording_entry(&room_id, &target).await? else {
            return Err(BoardError::NotFound("no active recording".to_string()));
        };

        let kind = ResourceKind::Recording(target.clone());
        if entry.node_id == self.node_id || self.registry.contains(&room_id, &kind).await {
            self.stop_local(&room_id, &target, socket_id).await?;
            return Ok(StopOutcome::StoppedLocally);
        }

        entry.status = RecordingStatus::Stopping;
        self.cluster.set_recording_entry(&room_id, &entry).await?;

        self.forward_stop(&room_id, &target, socket_id).await
    }

    async fn forward_stop(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        requester: &SocketId,
    ) -> Result<StopOutcome, BoardError> {
        let request_id = Uuid::new_v4();
        let claimed = self.pending.register(request_id).await;

        let message = BusMessage::StopRecording {
            request_id,
            room_id: room_id.clone(),
            user_id: user_id.clone(),
            requester_socket_id: requester.clone(),
        };
        if let Err(e) = self.broadcaster.publish(message).await {
            self.pending.cancel(request_id).await;
            metrics::record_recording_forward("publish_failed");
            return Err(e);
        }

        debug!(
            target: "board.recording",
            request_id = %request_id,
            room_id = %room_id,
            user_id = %user_id,
            "Forwarded recording stop"
        );

        if let Ok(Ok(())) = tokio::time::timeout(self.forward_timeout, claimed).await {
            metrics::record_recording_forward("claimed");
            return Ok(StopOutcome::Forwarded);
        }

        self.pending.cancel(request_id).await;

        // A missing entry means the holder stopped it and only the claim was lost
        if !self.cluster.has_recording_entry(room_id, user_id).await? {
            metrics::record_recording_forward("claimed_late");
            info!(
                target: "board.recording",
                request_id = %request_id,
                room_id = %room_id,
                user_id = %user_id,
                "Forwarded recording stop completed without a claim"
            );
            return Ok(StopOutcome::Forwarded);
        }

        metrics::record_recording_forward("timeout");
        warn!(
            target: "board.recording",
            request_id = %request_id,
            room_id = %room_id,
            user_id = %user_id,
            timeout_ms = self.forward_timeout.as_millis(),
            "Forwarded recording stop was not claimed, removing entry"
        );

        self.cluster.remove_recording_entry(room_id, user_id).await?;
        self.broadcaster
            .emit_to_room(
                room_id,
                ServerEvent::UserStoppedRecording {
                    user_id: user_id.clone(),
                },
                None,
            )
            .await;
        self.broadcaster
            .emit_to_socket(
                requester,
                ServerEvent::RecordingError {
                    message: HOST_UNAVAILABLE_MESSAGE.to_string(),
                },
            )
            .await;
        Ok(StopOutcome::TimedOut)
    }

    /// Act on a `StopRecording` relayed by `origin`, if this node holds the
    /// session.
    pub async fn handle_forwarded_stop(
        &self,
        origin: &NodeId,
        request_id: Uuid,
        room_id: &RoomId,
        user_id: &UserId,
        requester: &SocketId,
    ) -> Result<bool, BoardError> {
        let kind = ResourceKind::Recording(user_id.clone());
        if !self.registry.contains(room_id, &kind).await {
            return Ok(false);
        }

        self.release_handle(room_id, user_id).await;
        self.cluster.remove_recording_entry(room_id, user_id).await?;

        if let Err(e) = self
            .broadcaster
            .publish(BusMessage::StopRecordingClaimed {
                request_id,
                target: origin.clone(),
            })
            .await
        {
            warn!(
                target: "board.recording",
                request_id = %request_id,
                error = %e,
                "Failed to publish recording stop claim"
            );
        }

        self.notify_stopped(room_id, user_id, requester).await;
        info!(
            target: "board.recording",
            request_id = %request_id,
            origin = %origin,
            "Claimed forwarded recording stop"
        );
        Ok(true)
    }

    /// Wake the stop request waiting on `request_id` if it originated here.
    pub async fn handle_claim(&self, request_id: Uuid, target: &NodeId) {
        if *target == self.node_id && !self.pending.resolve(request_id).await {
            debug!(
                target: "board.recording",
                request_id = %request_id,
                "Claim arrived after the request timed out"
            );
        }
    }

    async fn stop_local(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        requester: &SocketId,
    ) -> Result<(), BoardError> {
        self.release_handle(room_id, user_id).await;
        self.cluster.remove_recording_entry(room_id, user_id).await?;
        self.notify_stopped(room_id, user_id, requester).await;
        Ok(())
    }

    /// Tell the requester and the room that a session ended.
    async fn notify_stopped(&self, room_id: &RoomId, user_id: &UserId, requester: &SocketId) {
        info!(
            target: "board.recording",
            room_id = %room_id,
            user_id = %user_id,
            "Recording stopped"
        );

        self.broadcaster
            .emit_to_socket(
                requester,
                ServerEvent::RecordingStopped {
                    user_id: user_id.clone(),
                },
            )
            .await;
        self.broadcaster
            .emit_to_room(
                room_id,
                ServerEvent::UserStoppedRecording {
                    user_id: user_id.clone(),
                },
                None,
            )
            .await;
    }

    async fn release_handle(&self, room_id: &RoomId, user_id: &UserId) {
        let kind = ResourceKind::Recording(user_id.clone());
        if let Some(handle) = self.registry.take(room_id, &kind).await {
            handle.release().await;
        }
    }

    async fn member_user(
        &self,
        socket_id: &SocketId,
        room_id: &RoomId,
    ) -> Result<SocketUser, BoardError> {
        let hub = self.broadcaster.hub();
        let user = hub.user(socket_id).await.ok_or(BoardError::Unauthenticated)?;
        if !hub.is_member(socket_id, room_id).await {
            return Err(BoardError::PermissionDenied(
                "not a member of this room".to_string(),
            ));
        }
        Ok(user)
    }
}
