//! Recording capture backends.

use crate::errors::BoardError;
use crate::recording::registry::LocalResource;
use common::types::{RoomId, UserId};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Starts a capture session and returns the handle that stops it.
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn start(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        upload_token: &str,
    ) -> Result<Box<dyn LocalResource>, BoardError>;
}

/// Capture backend that only logs session boundaries. The session handle is
/// a cancellation token.
#[derive(Debug, Default)]
pub struct LoggingCaptureBackend;

#[async_trait::async_trait]
impl CaptureBackend for LoggingCaptureBackend {
    async fn start(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        _upload_token: &str,
    ) -> Result<Box<dyn LocalResource>, BoardError> {
        let token = CancellationToken::new();
        let watched = token.clone();
        let (room_id, user_id) = (room_id.clone(), user_id.clone());

        info!(target: "board.recording", room_id = %room_id, user_id = %user_id, "Capture started");
        tokio::spawn(async move {
            watched.cancelled().await;
            info!(target: "board.recording", room_id = %room_id, user_id = %user_id, "Capture stopped");
        });

        Ok(Box::new(token))
    }
}
