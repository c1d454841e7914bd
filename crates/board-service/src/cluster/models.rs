//! Persisted per-room records.
//!
//! Every record carries the `node_id` of the process that owns it; a record
//! whose owner has stopped heartbeating is stale. Records are stored as
//! camelCase JSON. The `*Notice` types are the shapes sent to clients, which
//! never see node ids or upload tokens.

use common::types::{NodeId, SocketId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Active presentation in a room. At most one live instance per room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationSession {
    pub presenter_id: UserId,
    pub presenter_name: String,
    /// Unix epoch milliseconds.
    pub start_time: i64,
    pub node_id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationNotice {
    pub presenter_id: UserId,
    pub presenter_name: String,
    pub start_time: i64,
}

impl PresentationSession {
    pub fn notice(&self) -> PresentationNotice {
        PresentationNotice {
            presenter_id: self.presenter_id.clone(),
            presenter_name: self.presenter_name.clone(),
            start_time: self.start_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Starting,
    Recording,
    Stopping,
}

/// One user's recording session, a field of the room's recordings hash.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingEntry {
    pub user_id: UserId,
    pub username: String,
    pub upload_token: String,
    pub status: RecordingStatus,
    pub node_id: NodeId,
    /// Unix epoch milliseconds.
    pub started_at: i64,
}

impl fmt::Debug for RecordingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingEntry")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("upload_token", &"[REDACTED]")
            .field("status", &self.status)
            .field("node_id", &self.node_id)
            .field("started_at", &self.started_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingNotice {
    pub user_id: UserId,
    pub username: String,
    pub status: RecordingStatus,
    pub started_at: i64,
}

impl RecordingEntry {
    pub fn notice(&self) -> RecordingNotice {
        RecordingNotice {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            status: self.status,
            started_at: self.started_at,
        }
    }
}

/// The room's single sync authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncerAssignment {
    pub user_id: UserId,
    pub node_id: NodeId,
}

/// One socket's membership in a room, a field of the room's members hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    pub socket_id: SocketId,
    pub user_id: UserId,
    pub username: String,
    pub read_only: bool,
    pub node_id: NodeId,
    /// Unix epoch milliseconds; orders syncer candidates.
    pub joined_at: i64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn entry() -> RecordingEntry {
        RecordingEntry {
            user_id: UserId::new("u1"),
            username: "Ada".to_string(),
            upload_token: "upl-secret".to_string(),
            status: RecordingStatus::Recording,
            node_id: NodeId::new("node-a"),
            started_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_records_use_camel_case_json() {
        let json = serde_json::to_value(entry()).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["uploadToken"], "upl-secret");
        assert_eq!(json["nodeId"], "node-a");
        assert_eq!(json["status"], "recording");
        assert_eq!(json["startedAt"], 1_700_000_000_000_i64);
    }

    #[test]
    fn test_recording_notice_strips_node_and_token() {
        let json = serde_json::to_value(entry().notice()).unwrap();
        assert!(json.get("nodeId").is_none());
        assert!(json.get("uploadToken").is_none());
        assert_eq!(json["username"], "Ada");
    }

    #[test]
    fn test_recording_entry_debug_redacts_token() {
        assert!(!format!("{:?}", entry()).contains("upl-secret"));
    }

    #[test]
    fn test_presentation_notice_strips_node() {
        let session = PresentationSession {
            presenter_id: UserId::new("u1"),
            presenter_name: "Ada".to_string(),
            start_time: 5,
            node_id: NodeId::new("node-a"),
        };

        let json = serde_json::to_value(session.notice()).unwrap();
        assert_eq!(json["presenterId"], "u1");
        assert!(json.get("nodeId").is_none());
    }
}
