//! Process-local registry of connected sockets.

use crate::events::ServerEvent;
use crate::observability::metrics;
use common::types::{RoomId, SocketId, UserId};
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Outbound queue depth per socket.
pub const SOCKET_QUEUE_CAPACITY: usize = 256;

/// Identity attached to a socket after authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketUser {
    pub user_id: UserId,
    pub username: String,
    pub read_only: bool,
}

/// A socket connected to this node.
#[derive(Debug)]
pub struct LocalSocket {
    pub user: Option<SocketUser>,
    pub rooms: HashSet<RoomId>,
    sender: mpsc::Sender<ServerEvent>,
}

/// Sockets connected to this process, keyed by socket id.
#[derive(Debug, Default)]
pub struct SocketHub {
    sockets: RwLock<HashMap<SocketId, LocalSocket>>,
}

impl SocketHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a socket and return the receiving end of its outbound queue.
    pub async fn register(&self, socket_id: SocketId) -> mpsc::Receiver<ServerEvent> {
        let (sender, receiver) = mpsc::channel(SOCKET_QUEUE_CAPACITY);
        let count = {
            let mut sockets = self.sockets.write().await;
            sockets.insert(
                socket_id,
                LocalSocket {
                    user: None,
                    rooms: HashSet::new(),
                    sender,
                },
            );
            sockets.len()
        };
        metrics::set_sockets_active(count);
        receiver
    }

    /// Remove a socket, returning its final state.
    pub async fn unregister(&self, socket_id: &SocketId) -> Option<LocalSocket> {
        let (removed, count) = {
            let mut sockets = self.sockets.write().await;
            let removed = sockets.remove(socket_id);
            (removed, sockets.len())
        };
        metrics::set_sockets_active(count);
        removed
    }

    /// Attach an authenticated identity. Returns false for unknown sockets.
    pub async fn set_user(&self, socket_id: &SocketId, user: SocketUser) -> bool {
        match self.sockets.write().await.get_mut(socket_id) {
            Some(socket) => {
                socket.user = Some(user);
                true
            }
            None => false,
        }
    }

    pub async fn user(&self, socket_id: &SocketId) -> Option<SocketUser> {
        self.sockets
            .read()
            .await
            .get(socket_id)
            .and_then(|socket| socket.user.clone())
    }

    /// Add the socket to a room. Returns false if it was already a member or
    /// is unknown.
    pub async fn join(&self, socket_id: &SocketId, room_id: &RoomId) -> bool {
        self.sockets
            .write()
            .await
            .get_mut(socket_id)
            .is_some_and(|socket| socket.rooms.insert(room_id.clone()))
    }

    pub async fn leave(&self, socket_id: &SocketId, room_id: &RoomId) -> bool {
        self.sockets
            .write()
            .await
            .get_mut(socket_id)
            .is_some_and(|socket| socket.rooms.remove(room_id))
    }

    pub async fn is_member(&self, socket_id: &SocketId, room_id: &RoomId) -> bool {
        self.sockets
            .read()
            .await
            .get(socket_id)
            .is_some_and(|socket| socket.rooms.contains(room_id))
    }

    pub async fn contains(&self, socket_id: &SocketId) -> bool {
        self.sockets.read().await.contains_key(socket_id)
    }

    /// Queue an event for a local socket. Returns false if the socket is not
    /// on this node.
    pub async fn send(&self, socket_id: &SocketId, event: ServerEvent) -> bool {
        let sockets = self.sockets.read().await;
        let Some(socket) = sockets.get(socket_id) else {
            return false;
        };
        enqueue(socket_id, socket, event);
        true
    }

    /// Queue an event for every local member of a room, optionally skipping
    /// one socket. Returns the number of sockets addressed.
    pub async fn send_to_room(
        &self,
        room_id: &RoomId,
        event: &ServerEvent,
        except: Option<&SocketId>,
    ) -> usize {
        let sockets = self.sockets.read().await;
        let mut sent = 0;
        for (socket_id, socket) in sockets.iter() {
            if Some(socket_id) == except || !socket.rooms.contains(room_id) {
                continue;
            }
            enqueue(socket_id, socket, event.clone());
            sent += 1;
        }
        sent
    }

    pub async fn len(&self) -> usize {
        self.sockets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sockets.read().await.is_empty()
    }
}

fn enqueue(socket_id: &SocketId, socket: &LocalSocket, event: ServerEvent) {
    let name = event.name();
    match socket.sender.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(
                target: "board.transport",
                socket_id = %socket_id,
                event = name,
                "Outbound queue full, dropping event"
            );
            metrics::record_event_dropped();
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(
                target: "board.transport",
                socket_id = %socket_id,
                event = name,
                "Socket writer gone, dropping event"
            );
        }
    }
}
