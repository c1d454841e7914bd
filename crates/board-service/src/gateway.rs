//! WebSocket gateway.
//!
//! `GET /ws` upgrades to a socket whose first text frame must be
//! `{"event":"authenticate","data":{"token":"..."}}`. After that, inbound
//! events are dispatched to the room and recording services and outbound
//! events are drained from the socket's [`crate::transport::SocketHub`] queue
//! by a dedicated writer task.
//!
//! Handler errors never close the socket; they are answered with
//! `access-denied` (room and presentation events) or `recording-error`
//! (recording events).

use crate::errors::BoardError;
use crate::events::{ClientEvent, ServerEvent};
use crate::node::BoardNode;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use common::types::SocketId;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Largest accepted inbound frame.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Time a new socket has to authenticate.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

pub fn gateway_router(node: Arc<BoardNode>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(node)
}

async fn ws_upgrade(State(node): State<Arc<BoardNode>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_socket(node, socket))
}

#[instrument(skip_all, fields(socket_id))]
async fn handle_socket(node: Arc<BoardNode>, socket: WebSocket) {
    let socket_id = SocketId::generate();
    tracing::Span::current().record("socket_id", socket_id.as_str());

    let (mut sink, mut stream) = socket.split();
    let outbound = node.hub.register(socket_id.clone()).await;

    match tokio::time::timeout(AUTH_TIMEOUT, stream.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => {
            if let Err(e) = authenticate(&node, &socket_id, &text).await {
                warn!(
                    target: "board.gateway",
                    error_type = e.error_type_label(),
                    "Socket authentication failed"
                );
                let denied = ServerEvent::AccessDenied {
                    reason: e.client_message(),
                };
                if let Ok(frame) = serde_json::to_string(&denied) {
                    let _ = sink.send(Message::Text(frame)).await;
                }
                let _ = sink.send(Message::Close(None)).await;
                node.hub.unregister(&socket_id).await;
                return;
            }
        }
        _ => {
            debug!(target: "board.gateway", "Socket closed before authenticating");
            node.hub.unregister(&socket_id).await;
            return;
        }
    }

    info!(target: "board.gateway", "Socket authenticated");
    let writer = tokio::spawn(write_outbound(sink, outbound));

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => handle_client_event(&node, &socket_id, event).await,
                Err(e) => {
                    debug!(target: "board.gateway", error = %e, "Ignoring malformed frame");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(target: "board.gateway", error = %e, "Socket read failed");
                break;
            }
        }
    }

    node.rooms.on_disconnecting(&socket_id).await;
    writer.abort();
    info!(target: "board.gateway", "Socket disconnected");
}

async fn authenticate(node: &BoardNode, socket_id: &SocketId, text: &str) -> Result<(), BoardError> {
    let Ok(ClientEvent::Authenticate { token }) = serde_json::from_str::<ClientEvent>(text) else {
        return Err(BoardError::Unauthenticated);
    };
    let user = node.authenticator.authenticate(&token)?;
    node.hub.set_user(socket_id, user).await;
    Ok(())
}

async fn write_outbound(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerEvent>,
) {
    while let Some(event) = outbound.recv().await {
        let frame = match serde_json::to_string(&event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(target: "board.gateway", error = %e, event = event.name(), "Failed to encode event");
                continue;
            }
        };
        if sink.send(Message::Text(frame)).await.is_err() {
            break;
        }
    }
}

/// Dispatch one inbound event for an authenticated socket.
pub async fn handle_client_event(node: &BoardNode, socket_id: &SocketId, event: ClientEvent) {
    match event {
        ClientEvent::Authenticate { .. } => {
            debug!(target: "board.gateway", "Ignoring repeated authenticate");
        }
        ClientEvent::JoinRoom { room_id } => {
            if let Err(e) = node.rooms.join_room(socket_id, &room_id).await {
                reject(node, socket_id, "join-room", &e, Rejection::AccessDenied).await;
            }
        }
        ClientEvent::StartRecording {
            room_id,
            upload_token,
        } => {
            if let Err(e) = node
                .recordings
                .start_recording(socket_id, &room_id, &upload_token)
                .await
            {
                reject(node, socket_id, "start-recording", &e, Rejection::RecordingError).await;
            }
        }
        ClientEvent::StopRecording { room_id, user_id } => {
            if let Err(e) = node
                .recordings
                .stop_recording(socket_id, &room_id, user_id)
                .await
            {
                reject(node, socket_id, "stop-recording", &e, Rejection::RecordingError).await;
            }
        }
        ClientEvent::PresentationStart { room_id } => {
            if let Err(e) = node.rooms.start_presentation(socket_id, &room_id).await {
                reject(node, socket_id, "presentation-start", &e, Rejection::AccessDenied).await;
            }
        }
        ClientEvent::PresentationStop { room_id } => {
            if let Err(e) = node.rooms.stop_presentation(socket_id, &room_id).await {
                reject(node, socket_id, "presentation-stop", &e, Rejection::AccessDenied).await;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Rejection {
    AccessDenied,
    RecordingError,
}

async fn reject(
    node: &BoardNode,
    socket_id: &SocketId,
    event: &'static str,
    error: &BoardError,
    kind: Rejection,
) {
    warn!(
        target: "board.gateway",
        socket_id = %socket_id,
        event,
        error_type = error.error_type_label(),
        error = %error,
        "Socket event rejected"
    );

    let reply = match kind {
        Rejection::AccessDenied => ServerEvent::AccessDenied {
            reason: error.client_message(),
        },
        Rejection::RecordingError => ServerEvent::RecordingError {
            message: error.client_message(),
        },
    };
    node.hub.send(socket_id, reply).await;
}
