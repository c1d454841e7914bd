//! Socket event payloads.
//!
//! Frames are JSON objects of the form `{"event": "<kebab-name>", "data": ...}`
//! in both directions.

use crate::cluster::{PresentationNotice, RecordingNotice};
use common::types::{SocketId, UserId};
use serde::{Deserialize, Serialize};

/// One user in a `room-user-change` list, with every socket it has in the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUser {
    pub user_id: UserId,
    pub username: String,
    pub read_only: bool,
    pub socket_ids: Vec<SocketId>,
}

/// Events sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    SyncDesignate { is_syncer: bool },

    RoomUserChange(Vec<RoomUser>),

    #[serde(rename_all = "camelCase")]
    UserJoined {
        user_id: UserId,
        username: String,
        socket_id: SocketId,
    },

    UserStartedPresenting(PresentationNotice),

    #[serde(rename_all = "camelCase")]
    UserStoppedPresenting { user_id: UserId },

    UserStartedRecording(RecordingNotice),

    #[serde(rename_all = "camelCase")]
    UserStoppedRecording { user_id: UserId },

    #[serde(rename_all = "camelCase")]
    RecordingStopped { user_id: UserId },

    RecordingError { message: String },

    AccessDenied { reason: String },
}

impl ServerEvent {
    /// Event name as sent on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::SyncDesignate { .. } => "sync-designate",
            ServerEvent::RoomUserChange(_) => "room-user-change",
            ServerEvent::UserJoined { .. } => "user-joined",
            ServerEvent::UserStartedPresenting(_) => "user-started-presenting",
            ServerEvent::UserStoppedPresenting { .. } => "user-stopped-presenting",
            ServerEvent::UserStartedRecording(_) => "user-started-recording",
            ServerEvent::UserStoppedRecording { .. } => "user-stopped-recording",
            ServerEvent::RecordingStopped { .. } => "recording-stopped",
            ServerEvent::RecordingError { .. } => "recording-error",
            ServerEvent::AccessDenied { .. } => "access-denied",
        }
    }
}

/// Events received from clients.
///
/// Room ids arrive raw; handlers validate them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    Authenticate {
        token: String,
    },

    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String },

    #[serde(rename_all = "camelCase")]
    StartRecording {
        room_id: String,
        upload_token: String,
    },

    /// `user_id` defaults to the requesting socket's user.
    #[serde(rename_all = "camelCase")]
    StopRecording {
        room_id: String,
        #[serde(default)]
        user_id: Option<UserId>,
    },

    #[serde(rename_all = "camelCase")]
    PresentationStart { room_id: String },

    #[serde(rename_all = "camelCase")]
    PresentationStop { room_id: String },
}
