//! Identifier types shared by the whiteboard services.
//!
//! All identifiers are opaque strings on the wire (`#[serde(transparent)]`)
//! so persisted records and socket events stay plain JSON.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Maximum room identifier length after trimming.
pub const MAX_ROOM_ID_LEN: usize = 128;

/// Reasons a raw room identifier is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomIdError {
    #[error("room id is empty")]
    Empty,

    #[error("room id exceeds {MAX_ROOM_ID_LEN} characters")]
    TooLong,

    #[error("room id contains invalid characters")]
    InvalidCharacters,
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a collaborative room.
    ///
    /// Use [`RoomId::parse`] for untrusted input; it trims whitespace and
    /// restricts the id to `[A-Za-z0-9_-]` so it can be embedded in store keys.
    RoomId
);

string_id!(
    /// Identifier of an authenticated user (token subject).
    UserId
);

string_id!(
    /// Identifier of one running server process.
    NodeId
);

string_id!(
    /// Identifier of one client socket connection.
    SocketId
);

impl RoomId {
    /// Normalize and validate a client-supplied room id.
    ///
    /// # Errors
    ///
    /// Returns [`RoomIdError`] if the trimmed id is empty, longer than
    /// [`MAX_ROOM_ID_LEN`], or contains characters outside `[A-Za-z0-9_-]`.
    pub fn parse(raw: &str) -> Result<Self, RoomIdError> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(RoomIdError::Empty);
        }
        if trimmed.chars().count() > MAX_ROOM_ID_LEN {
            return Err(RoomIdError::TooLong);
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(RoomIdError::InvalidCharacters);
        }

        Ok(Self(trimmed.to_string()))
    }
}

impl SocketId {
    /// Allocate a fresh random socket id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_parse_trims_whitespace() {
        let room = RoomId::parse("  design-review_1 \n").unwrap();
        assert_eq!(room.as_str(), "design-review_1");
    }

    #[test]
    fn test_room_id_parse_rejects_empty() {
        assert_eq!(RoomId::parse(""), Err(RoomIdError::Empty));
        assert_eq!(RoomId::parse("   "), Err(RoomIdError::Empty));
    }

    #[test]
    fn test_room_id_parse_rejects_key_separators() {
        assert_eq!(
            RoomId::parse("room:1"),
            Err(RoomIdError::InvalidCharacters)
        );
        assert_eq!(
            RoomId::parse("room*"),
            Err(RoomIdError::InvalidCharacters)
        );
        assert_eq!(
            RoomId::parse("a b"),
            Err(RoomIdError::InvalidCharacters)
        );
    }

    #[test]
    fn test_room_id_parse_length_boundary() {
        let max = "r".repeat(MAX_ROOM_ID_LEN);
        assert!(RoomId::parse(&max).is_ok());

        let over = "r".repeat(MAX_ROOM_ID_LEN + 1);
        assert_eq!(RoomId::parse(&over), Err(RoomIdError::TooLong));
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let user = UserId::new("user-1");
        assert_eq!(serde_json::to_string(&user).unwrap(), "\"user-1\"");

        let node: NodeId = serde_json::from_str("\"node-a\"").unwrap();
        assert_eq!(node, NodeId::new("node-a"));
    }

    #[test]
    fn test_socket_id_generate_is_unique() {
        assert_ne!(SocketId::generate(), SocketId::generate());
    }
}
