//! Cluster message bus.
//!
//! Every node publishes [`BusEnvelope`]s to one shared channel and receives
//! all of them, including its own. Receivers filter by `origin` where needed.

use crate::errors::BoardError;
use crate::events::ServerEvent;
use common::types::{NodeId, RoomId, SocketId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;
use uuid::Uuid;

/// Queue depth between a bus subscription and its consumer.
pub const BUS_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEnvelope {
    pub origin: NodeId,
    pub message: BusMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BusMessage {
    /// Deliver an event to a socket hosted by whichever node holds it.
    EmitToSocket {
        socket_id: SocketId,
        event: ServerEvent,
    },

    /// Deliver an event to every member of a room on the receiving node.
    EmitToRoom {
        room_id: RoomId,
        event: ServerEvent,
        except: Option<SocketId>,
    },

    /// Ask the node holding a capture session to stop it.
    StopRecording {
        request_id: Uuid,
        room_id: RoomId,
        user_id: UserId,
        requester_socket_id: SocketId,
    },

    /// The holder stopped the session for `request_id`; addressed to `target`.
    StopRecordingClaimed { request_id: Uuid, target: NodeId },
}

/// Publish/subscribe transport shared by all nodes.
#[async_trait::async_trait]
pub trait ClusterBus: Send + Sync {
    async fn publish(&self, envelope: &BusEnvelope) -> Result<(), BoardError>;

    /// Open a subscription receiving every envelope published after the call.
    async fn subscribe(&self) -> Result<mpsc::Receiver<BusEnvelope>, BoardError>;
}

/// In-process bus. Clones share one channel, so several nodes in one process
/// can talk to each other.
#[derive(Debug, Clone)]
pub struct MemoryBus {
    sender: broadcast::Sender<BusEnvelope>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_QUEUE_CAPACITY);
        Self { sender }
    }
}

#[async_trait::async_trait]
impl ClusterBus for MemoryBus {
    async fn publish(&self, envelope: &BusEnvelope) -> Result<(), BoardError> {
        // no subscribers is not an error
        let _ = self.sender.send(envelope.clone());
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<BusEnvelope>, BoardError> {
        let mut source = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(BUS_QUEUE_CAPACITY);

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(envelope) => {
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(target: "board.bus", skipped, "Bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}
