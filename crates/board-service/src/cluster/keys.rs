//! Store key layout for per-room state.

use common::types::RoomId;

pub const PRESENTATION_SUFFIX: &str = "presentation";
pub const RECORDINGS_SUFFIX: &str = "recordings";
pub const SYNCER_SUFFIX: &str = "syncer";
pub const MEMBERS_SUFFIX: &str = "members";
pub const TIMER_SUFFIX: &str = "timer";
pub const VOTING_SUFFIX: &str = "voting";

pub fn room_key(room_id: &RoomId, suffix: &str) -> String {
    format!("room:{room_id}:{suffix}")
}

/// Scan pattern matching `suffix` keys of every room.
pub fn all_rooms_pattern(suffix: &str) -> String {
    format!("room:*:{suffix}")
}

/// Recover the room id from a `room:{id}:{suffix}` key.
pub fn room_from_key(key: &str, suffix: &str) -> Option<RoomId> {
    let id = key
        .strip_prefix("room:")?
        .strip_suffix(suffix)?
        .strip_suffix(':')?;
    if id.is_empty() {
        return None;
    }
    Some(RoomId::new(id))
}
