//! Board service error types.
//!
//! Errors map to numeric codes and client-safe messages for socket events.
//! Internal details are logged server-side but never sent to clients.

use thiserror::Error;

/// Board service error type.
///
/// Maps to client error codes:
/// - `Validation`: `INVALID_REQUEST` (1)
/// - `Unauthenticated`: `UNAUTHORIZED` (2)
/// - `PermissionDenied`: `FORBIDDEN` (3)
/// - `NotFound`: `NOT_FOUND` (4)
/// - `Conflict`: `CONFLICT` (5)
/// - Store, Serialization, Bus, Capture, Config, Internal: `INTERNAL_ERROR` (6)
#[derive(Debug, Error)]
pub enum BoardError {
    /// Store backend rejected the operation.
    #[error("Store error: {0}")]
    Store(String),

    /// Store backend could not be reached (connection dropped/refused, IO, timeout).
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Client input failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The socket has not presented a valid token.
    #[error("Unauthenticated")]
    Unauthenticated,

    /// The user is not allowed to perform the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Referenced room state does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation conflicts with existing room state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Cluster bus publish/subscribe failed.
    #[error("Bus error: {0}")]
    Bus(String),

    /// Recording capture backend failed.
    #[error("Capture error: {0}")]
    Capture(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BoardError {
    /// Returns the client error code for this error.
    pub fn error_code(&self) -> i32 {
        match self {
            BoardError::Validation(_) => 1,      // INVALID_REQUEST
            BoardError::Unauthenticated => 2,    // UNAUTHORIZED
            BoardError::PermissionDenied(_) => 3, // FORBIDDEN
            BoardError::NotFound(_) => 4,        // NOT_FOUND
            BoardError::Conflict(_) => 5,        // CONFLICT
            BoardError::Store(_)
            | BoardError::StoreUnavailable(_)
            | BoardError::Serialization(_)
            | BoardError::Bus(_)
            | BoardError::Capture(_)
            | BoardError::Config(_)
            | BoardError::Internal(_) => 6, // INTERNAL_ERROR
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            BoardError::Store(_)
            | BoardError::Serialization(_)
            | BoardError::Bus(_)
            | BoardError::Config(_)
            | BoardError::Internal(_) => "An internal error occurred".to_string(),
            BoardError::StoreUnavailable(_) => {
                "Shared state is temporarily unavailable".to_string()
            }
            BoardError::Capture(_) => "Recording could not be started".to_string(),
            BoardError::Unauthenticated => "Authentication required".to_string(),
            BoardError::Validation(msg)
            | BoardError::PermissionDenied(msg)
            | BoardError::NotFound(msg)
            | BoardError::Conflict(msg) => msg.clone(),
        }
    }

    /// Bounded label for metrics.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            BoardError::Store(_) => "store",
            BoardError::StoreUnavailable(_) => "store_unavailable",
            BoardError::Serialization(_) => "serialization",
            BoardError::Validation(_) => "validation",
            BoardError::Unauthenticated => "unauthenticated",
            BoardError::PermissionDenied(_) => "permission_denied",
            BoardError::NotFound(_) => "not_found",
            BoardError::Conflict(_) => "conflict",
            BoardError::Bus(_) => "bus",
            BoardError::Capture(_) => "capture",
            BoardError::Config(_) => "config",
            BoardError::Internal(_) => "internal",
        }
    }

    /// True for transient backend outages that readers treat as "no data".
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BoardError::StoreUnavailable(_))
    }
}

impl From<serde_json::Error> for BoardError {
    fn from(err: serde_json::Error) -> Self {
        BoardError::Serialization(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(BoardError::Validation("bad room".into()).error_code(), 1);
        assert_eq!(BoardError::Unauthenticated.error_code(), 2);
        assert_eq!(BoardError::PermissionDenied("ro".into()).error_code(), 3);
        assert_eq!(BoardError::NotFound("rec".into()).error_code(), 4);
        assert_eq!(BoardError::Conflict("presenting".into()).error_code(), 5);
        assert_eq!(BoardError::Store("WRONGTYPE".into()).error_code(), 6);
        assert_eq!(BoardError::StoreUnavailable("io".into()).error_code(), 6);
        assert_eq!(BoardError::Bus("closed".into()).error_code(), 6);
        assert_eq!(BoardError::Capture("browser".into()).error_code(), 6);
    }

    #[test]
    fn test_client_message_hides_internal_details() {
        let err = BoardError::Store("ERR connection to 10.0.0.5:6379 reset".into());
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = BoardError::Capture("chromium exited with 137".into());
        assert!(!err.client_message().contains("chromium"));
    }

    #[test]
    fn test_client_message_passes_user_facing_text() {
        let err = BoardError::PermissionDenied("Read-only users cannot record".into());
        assert_eq!(err.client_message(), "Read-only users cannot record");
    }

    #[test]
    fn test_is_unavailable() {
        assert!(BoardError::StoreUnavailable("timeout".into()).is_unavailable());
        assert!(!BoardError::Store("WRONGTYPE".into()).is_unavailable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let err: BoardError = serde_json::from_str::<u32>("not-a-number")
            .unwrap_err()
            .into();
        assert_eq!(err.error_type_label(), "serialization");
    }
}
