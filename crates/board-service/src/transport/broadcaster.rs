//! Routes server events to sockets on any node.

use crate::errors::BoardError;
use crate::events::ServerEvent;
use crate::transport::bus::{BusEnvelope, BusMessage, ClusterBus};
use crate::transport::hub::SocketHub;
use common::types::{NodeId, RoomId, SocketId};
use std::sync::Arc;
use tracing::warn;

pub struct Broadcaster {
    node_id: NodeId,
    hub: Arc<SocketHub>,
    bus: Arc<dyn ClusterBus>,
}

impl Broadcaster {
    pub fn new(node_id: NodeId, hub: Arc<SocketHub>, bus: Arc<dyn ClusterBus>) -> Self {
        Self { node_id, hub, bus }
    }

    pub fn hub(&self) -> &Arc<SocketHub> {
        &self.hub
    }

    /// Deliver to one socket: directly when it is local, otherwise through
    /// the bus to whichever node holds it.
    pub async fn emit_to_socket(&self, socket_id: &SocketId, event: ServerEvent) {
        if self.hub.contains(socket_id).await {
            self.hub.send(socket_id, event).await;
            return;
        }

        self.publish_logged(BusMessage::EmitToSocket {
            socket_id: socket_id.clone(),
            event,
        })
        .await;
    }

    /// Deliver to every member of a room across the cluster, optionally
    /// skipping one socket.
    pub async fn emit_to_room(
        &self,
        room_id: &RoomId,
        event: ServerEvent,
        except: Option<&SocketId>,
    ) {
        self.hub.send_to_room(room_id, &event, except).await;

        self.publish_logged(BusMessage::EmitToRoom {
            room_id: room_id.clone(),
            event,
            except: except.cloned(),
        })
        .await;
    }

    /// Apply an emit relayed by another node. Envelopes this node published
    /// itself were already delivered locally.
    pub async fn deliver_local(&self, envelope: &BusEnvelope) {
        if envelope.origin == self.node_id {
            return;
        }
        match &envelope.message {
            BusMessage::EmitToSocket { socket_id, event } => {
                self.hub.send(socket_id, event.clone()).await;
            }
            BusMessage::EmitToRoom {
                room_id,
                event,
                except,
            } => {
                self.hub.send_to_room(room_id, event, except.as_ref()).await;
            }
            BusMessage::StopRecording { .. } | BusMessage::StopRecordingClaimed { .. } => {}
        }
    }

    /// Publish a message stamped with this node's id.
    pub async fn publish(&self, message: BusMessage) -> Result<(), BoardError> {
        self.bus
            .publish(&BusEnvelope {
                origin: self.node_id.clone(),
                message,
            })
            .await
    }

    async fn publish_logged(&self, message: BusMessage) {
        if let Err(e) = self.publish(message).await {
            warn!(target: "board.transport", error = %e, "Failed to relay event over bus");
        }
    }
}
