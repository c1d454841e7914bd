//! Process-local handles for per-room resources.
//!
//! Capture sessions, timers and voting rounds run inside the node that
//! started them. Other nodes reach them only through the cluster bus.

use common::types::{RoomId, UserId};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A resource that must be released when its room state is torn down.
#[async_trait::async_trait]
pub trait LocalResource: Send {
    async fn release(self: Box<Self>);
}

#[async_trait::async_trait]
impl LocalResource for CancellationToken {
    async fn release(self: Box<Self>) {
        self.cancel();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Recording(UserId),
    Timer,
    Voting,
}

#[derive(Default)]
pub struct ResourceRegistry {
    entries: Mutex<HashMap<(RoomId, ResourceKind), Box<dyn LocalResource>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a handle, returning any handle it replaced.
    pub async fn insert(
        &self,
        room_id: RoomId,
        kind: ResourceKind,
        resource: Box<dyn LocalResource>,
    ) -> Option<Box<dyn LocalResource>> {
        self.entries.lock().await.insert((room_id, kind), resource)
    }

    pub async fn take(&self, room_id: &RoomId, kind: &ResourceKind) -> Option<Box<dyn LocalResource>> {
        self.entries
            .lock()
            .await
            .remove(&(room_id.clone(), kind.clone()))
    }

    pub async fn contains(&self, room_id: &RoomId, kind: &ResourceKind) -> bool {
        self.entries
            .lock()
            .await
            .contains_key(&(room_id.clone(), kind.clone()))
    }

    /// Release every handle held by this process.
    pub async fn release_all(&self) {
        let drained: Vec<_> = self.entries.lock().await.drain().collect();
        for ((room_id, kind), resource) in drained {
            debug!(target: "board.recording", room_id = %room_id, kind = ?kind, "Releasing resource");
            resource.release().await;
        }
    }

    /// Release the timer and voting handles of a room, if held here.
    pub async fn release_room_features(&self, room_id: &RoomId) {
        for kind in [ResourceKind::Timer, ResourceKind::Voting] {
            if let Some(resource) = self.take(room_id, &kind).await {
                debug!(target: "board.recording", room_id = %room_id, kind = ?kind, "Releasing room feature");
                resource.release().await;
            }
        }
    }
}
