//! Room join/leave protocol.
//!
//! # Syncer election
//!
//! Each room has at most one syncer, the member whose board state late
//! joiners sync from. The role is claimed with a conditional write
//! ([`ClusterService::try_set_syncer`]), so concurrent joins on different
//! nodes agree on one winner. Read-only users are never eligible.
//!
//! # Disconnects
//!
//! Leaving a room removes the socket's member record. If the socket was its
//! user's last one in the room, that user gives up the syncer role and any
//! active presentation.

pub mod presentation;

use crate::cluster::{ClusterService, MemberRecord, SyncerAssignment};
use crate::errors::BoardError;
use crate::events::{RoomUser, ServerEvent};
use crate::observability::metrics;
use crate::recording::ResourceRegistry;
use crate::transport::{Broadcaster, SocketHub, SocketUser};
use common::types::{NodeId, RoomId, SocketId, UserId};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Normalize a client-supplied room id.
pub(crate) fn parse_room(raw: &str) -> Result<RoomId, BoardError> {
    RoomId::parse(raw).map_err(|e| BoardError::Validation(e.to_string()))
}

/// Result of a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined { is_syncer: bool },
    /// The socket was already in the room; nothing changed.
    AlreadyMember,
}

pub struct RoomLifecycleService {
    node_id: NodeId,
    cluster: Arc<ClusterService>,
    broadcaster: Arc<Broadcaster>,
    registry: Arc<ResourceRegistry>,
}

impl RoomLifecycleService {
    pub fn new(
        node_id: NodeId,
        cluster: Arc<ClusterService>,
        broadcaster: Arc<Broadcaster>,
        registry: Arc<ResourceRegistry>,
    ) -> Self {
        Self {
            node_id,
            cluster,
            broadcaster,
            registry,
        }
    }

    fn hub(&self) -> &SocketHub {
        self.broadcaster.hub()
    }

    /// Join `raw_room_id`, elect a syncer if the room has none, and bring the
    /// new arrival up to date.
    #[instrument(skip_all, fields(socket_id = %socket_id))]
    pub async fn join_room(
        &self,
        socket_id: &SocketId,
        raw_room_id: &str,
    ) -> Result<JoinOutcome, BoardError> {
        let room_id = parse_room(raw_room_id)?;
        let user = self
            .hub()
            .user(socket_id)
            .await
            .ok_or(BoardError::Unauthenticated)?;

        if !self.hub().join(socket_id, &room_id).await {
            debug!(target: "board.rooms", room_id = %room_id, "Socket already in room");
            return Ok(JoinOutcome::AlreadyMember);
        }

        let member = MemberRecord {
            socket_id: socket_id.clone(),
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            read_only: user.read_only,
            node_id: self.node_id.clone(),
            joined_at: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(e) = self.cluster.add_member(&room_id, &member).await {
            self.hub().leave(socket_id, &room_id).await;
            return Err(e);
        }

        let is_syncer = self.elect(&room_id, &user).await;
        self.hub()
            .send(socket_id, ServerEvent::SyncDesignate { is_syncer })
            .await;

        info!(
            target: "board.rooms",
            room_id = %room_id,
            user_id = %user.user_id,
            is_syncer,
            "Socket joined room"
        );

        self.broadcast_membership(&room_id).await?;
        self.broadcaster
            .emit_to_room(
                &room_id,
                ServerEvent::UserJoined {
                    user_id: user.user_id.clone(),
                    username: user.username.clone(),
                    socket_id: socket_id.clone(),
                },
                Some(socket_id),
            )
            .await;

        self.hydrate(socket_id, &room_id).await?;

        Ok(JoinOutcome::Joined { is_syncer })
    }

    /// Decide whether the joining user is the room's syncer.
    async fn elect(&self, room_id: &RoomId, user: &SocketUser) -> bool {
        let current = match self.cluster.get_syncer(room_id).await {
            Ok(current) => current,
            Err(e) => {
                warn!(target: "board.rooms", room_id = %room_id, error = %e, "Syncer read failed");
                metrics::record_election("error");
                return false;
            }
        };

        if let Some(current) = current {
            let reaffirmed = current.user_id == user.user_id;
            metrics::record_election(if reaffirmed { "reaffirmed" } else { "lost" });
            return reaffirmed;
        }

        if user.read_only {
            metrics::record_election("ineligible");
            return false;
        }

        let claim = SyncerAssignment {
            user_id: user.user_id.clone(),
            node_id: self.node_id.clone(),
        };
        match self.cluster.try_set_syncer(room_id, &claim).await {
            Ok(true) => {
                metrics::record_election("won");
                true
            }
            Ok(false) => {
                // Another socket of the same user may have won the race.
                let winner = self.cluster.get_syncer(room_id).await.ok().flatten();
                let reaffirmed = winner.is_some_and(|w| w.user_id == user.user_id);
                metrics::record_election(if reaffirmed { "reaffirmed" } else { "lost" });
                reaffirmed
            }
            Err(e) => {
                warn!(target: "board.rooms", room_id = %room_id, error = %e, "Syncer election failed");
                metrics::record_election("error");
                false
            }
        }
    }

    /// Unicast the live presentation and recordings to a new arrival.
    async fn hydrate(&self, socket_id: &SocketId, room_id: &RoomId) -> Result<(), BoardError> {
        if let Some(session) = self.cluster.get_presentation(room_id).await? {
            self.hub()
                .send(socket_id, ServerEvent::UserStartedPresenting(session.notice()))
                .await;
        }

        for entry in self.cluster.get_recording_state(room_id).await? {
            self.hub()
                .send(socket_id, ServerEvent::UserStartedRecording(entry.notice()))
                .await;
        }
        Ok(())
    }

    /// Tear down every room membership of a closing socket.
    #[instrument(skip_all, fields(socket_id = %socket_id))]
    pub async fn on_disconnecting(&self, socket_id: &SocketId) {
        let Some(socket) = self.hub().unregister(socket_id).await else {
            return;
        };

        for room_id in &socket.rooms {
            if let Err(e) = self.leave_room(room_id, socket_id, socket.user.as_ref()).await {
                warn!(
                    target: "board.rooms",
                    room_id = %room_id,
                    error = %e,
                    "Failed to clean up room on disconnect"
                );
            }
        }
    }

    async fn leave_room(
        &self,
        room_id: &RoomId,
        socket_id: &SocketId,
        user: Option<&SocketUser>,
    ) -> Result<(), BoardError> {
        self.cluster.remove_member(room_id, socket_id).await?;
        let members = self.cluster.get_members(room_id).await?;

        // A syncer lost to a dead node is vacant even if the leaver never held it
        let syncer = self.cluster.get_syncer(room_id).await?;

        let Some(user) = user else {
            if members.is_empty() || syncer.is_none() {
                self.find_new_syncer(room_id).await?;
            }
            return self.send_membership(room_id, &members).await;
        };
        let has_sibling = members.iter().any(|m| m.user_id == user.user_id);

        let vacated = match &syncer {
            None => true,
            Some(s) => s.user_id == user.user_id && !has_sibling,
        };
        if members.is_empty() || vacated {
            self.find_new_syncer(room_id).await?;
        }

        if !has_sibling {
            let presenting = self
                .cluster
                .get_presentation(room_id)
                .await?
                .is_some_and(|p| p.presenter_id == user.user_id);
            if presenting {
                self.cluster.clear_presentation(room_id).await?;
                self.broadcaster
                    .emit_to_room(
                        room_id,
                        ServerEvent::UserStoppedPresenting {
                            user_id: user.user_id.clone(),
                        },
                        None,
                    )
                    .await;
            }
        }

        debug!(
            target: "board.rooms",
            room_id = %room_id,
            user_id = %user.user_id,
            remaining = members.len(),
            "Socket left room"
        );
        self.send_membership(room_id, &members).await
    }

    /// Re-elect a syncer among the room's remaining members.
    ///
    /// A live syncer that is still a member keeps the role. With no members
    /// left the room's syncer and feature state are cleared. Returns the
    /// syncer after the call, if any.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn find_new_syncer(&self, room_id: &RoomId) -> Result<Option<UserId>, BoardError> {
        let members = self.cluster.get_members(room_id).await?;

        if members.is_empty() {
            self.cluster.clear_syncer(room_id).await?;
            self.cluster.clear_room_features(room_id).await?;
            self.registry.release_room_features(room_id).await;
            debug!(target: "board.rooms", room_id = %room_id, "Room empty, cleared syncer");
            return Ok(None);
        }

        if let Some(current) = self.cluster.get_syncer(room_id).await? {
            if members.iter().any(|m| m.user_id == current.user_id) {
                return Ok(Some(current.user_id));
            }
            self.cluster.clear_syncer(room_id).await?;
        }

        let Some(candidate) = room_users(&members).into_iter().find(|u| !u.read_only) else {
            info!(target: "board.rooms", room_id = %room_id, "No eligible syncer left in room");
            return Ok(None);
        };
        let Some(node_id) = members
            .iter()
            .find(|m| m.user_id == candidate.user_id)
            .map(|m| m.node_id.clone())
        else {
            return Ok(None);
        };

        let claim = SyncerAssignment {
            user_id: candidate.user_id.clone(),
            node_id,
        };
        if !self.cluster.try_set_syncer(room_id, &claim).await? {
            // Another node re-elected between our clear and this write.
            metrics::record_election("lost");
            return Ok(self.cluster.get_syncer(room_id).await?.map(|s| s.user_id));
        }

        metrics::record_election("won");
        info!(
            target: "board.rooms",
            room_id = %room_id,
            user_id = %candidate.user_id,
            "New syncer elected"
        );
        for socket_id in &candidate.socket_ids {
            self.broadcaster
                .emit_to_socket(socket_id, ServerEvent::SyncDesignate { is_syncer: true })
                .await;
        }
        Ok(Some(candidate.user_id))
    }

    /// Broadcast the room's deduplicated user list to every member.
    pub async fn broadcast_membership(&self, room_id: &RoomId) -> Result<(), BoardError> {
        let members = self.cluster.get_members(room_id).await?;
        self.send_membership(room_id, &members).await
    }

    async fn send_membership(
        &self,
        room_id: &RoomId,
        members: &[MemberRecord],
    ) -> Result<(), BoardError> {
        self.broadcaster
            .emit_to_room(room_id, ServerEvent::RoomUserChange(room_users(members)), None)
            .await;
        Ok(())
    }
}

/// One entry per user, in order of each user's first join, listing all of
/// the user's sockets.
pub fn room_users(members: &[MemberRecord]) -> Vec<RoomUser> {
    let mut users: Vec<RoomUser> = Vec::new();
    for member in members {
        match users.iter_mut().find(|u| u.user_id == member.user_id) {
            Some(user) => user.socket_ids.push(member.socket_id.clone()),
            None => users.push(RoomUser {
                user_id: member.user_id.clone(),
                username: member.username.clone(),
                read_only: member.read_only,
                socket_ids: vec![member.socket_id.clone()],
            }),
        }
    }
    users
}
