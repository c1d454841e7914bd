//! Presentation start/stop.

use super::{parse_room, RoomLifecycleService};
use crate::cluster::PresentationSession;
use crate::errors::BoardError;
use crate::events::ServerEvent;
use crate::transport::SocketUser;
use common::types::{RoomId, SocketId};
use tracing::{info, instrument};

impl RoomLifecycleService {
    /// Make the socket's user the room's presenter.
    ///
    /// Succeeds when nobody presents or the caller already does.
    #[instrument(skip_all, fields(socket_id = %socket_id))]
    pub async fn start_presentation(
        &self,
        socket_id: &SocketId,
        raw_room_id: &str,
    ) -> Result<(), BoardError> {
        let (room_id, user) = self.presenting_member(socket_id, raw_room_id).await?;
        if user.read_only {
            return Err(BoardError::PermissionDenied(
                "read-only users cannot present".to_string(),
            ));
        }

        let start_time = match self.cluster.get_presentation(&room_id).await? {
            Some(current) if current.presenter_id != user.user_id => {
                return Err(BoardError::Conflict(
                    "another user is presenting".to_string(),
                ));
            }
            Some(current) => current.start_time,
            None => chrono::Utc::now().timestamp_millis(),
        };

        let session = PresentationSession {
            presenter_id: user.user_id.clone(),
            presenter_name: user.username.clone(),
            start_time,
            node_id: self.node_id.clone(),
        };
        self.cluster.set_presentation(&room_id, &session).await?;

        info!(
            target: "board.rooms",
            room_id = %room_id,
            user_id = %user.user_id,
            "Presentation started"
        );
        self.broadcaster
            .emit_to_room(&room_id, ServerEvent::UserStartedPresenting(session.notice()), None)
            .await;
        Ok(())
    }

    /// End the room's presentation. Only the presenter may stop it.
    #[instrument(skip_all, fields(socket_id = %socket_id))]
    pub async fn stop_presentation(
        &self,
        socket_id: &SocketId,
        raw_room_id: &str,
    ) -> Result<(), BoardError> {
        let (room_id, user) = self.presenting_member(socket_id, raw_room_id).await?;

        let Some(current) = self.cluster.get_presentation(&room_id).await? else {
            return Err(BoardError::NotFound("no active presentation".to_string()));
        };
        if current.presenter_id != user.user_id {
            return Err(BoardError::PermissionDenied(
                "only the presenter can stop the presentation".to_string(),
            ));
        }

        self.cluster.clear_presentation(&room_id).await?;

        info!(
            target: "board.rooms",
            room_id = %room_id,
            user_id = %user.user_id,
            "Presentation stopped"
        );
        self.broadcaster
            .emit_to_room(
                &room_id,
                ServerEvent::UserStoppedPresenting {
                    user_id: user.user_id,
                },
                None,
            )
            .await;
        Ok(())
    }

    async fn presenting_member(
        &self,
        socket_id: &SocketId,
        raw_room_id: &str,
    ) -> Result<(RoomId, SocketUser), BoardError> {
        let room_id = parse_room(raw_room_id)?;
        let user = self
            .hub()
            .user(socket_id)
            .await
            .ok_or(BoardError::Unauthenticated)?;
        if !self.hub().is_member(socket_id, &room_id).await {
            return Err(BoardError::PermissionDenied(
                "not a member of this room".to_string(),
            ));
        }
        Ok((room_id, user))
    }
}
