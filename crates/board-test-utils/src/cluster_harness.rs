//! In-process multi-node cluster.
//!
//! Every [`TestNode`] is a full [`BoardNode`] (heartbeat, bus listener, sweep)
//! sharing one [`MemoryBackend::shared`] store and one [`MemoryBus`]. Sockets
//! are attached straight to a node's hub, so tests drive the room and
//! recording services without a WebSocket client.

use crate::fixtures::{test_secret, TestUser};
use crate::mock_capture::MockCaptureBackend;
use board_service::auth::JwtAuthenticator;
use board_service::cluster::StateTtls;
use board_service::events::{ClientEvent, ServerEvent};
use board_service::gateway::handle_client_event;
use board_service::node::{BoardNode, NodeSettings};
use board_service::rooms::JoinOutcome;
use board_service::store::{DistributedState, MemoryBackend};
use board_service::transport::MemoryBus;
use common::types::{NodeId, SocketId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Heartbeat TTL used by test nodes.
pub const TEST_HEARTBEAT_TTL: Duration = Duration::from_secs(4);

/// Forward timeout used by test nodes.
pub const TEST_FORWARD_TIMEOUT: Duration = Duration::from_millis(500);

/// How long [`TestSocket::next_event`] waits.
pub const EVENT_WAIT: Duration = Duration::from_secs(1);

/// Shared store and bus for a set of test nodes.
#[derive(Clone)]
pub struct TestCluster {
    pub state: DistributedState,
    pub bus: MemoryBus,
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl TestCluster {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DistributedState::new(Arc::new(MemoryBackend::shared())),
            bus: MemoryBus::new(),
        }
    }

    pub fn settings(node_id: &str) -> NodeSettings {
        NodeSettings {
            node_id: NodeId::new(node_id),
            heartbeat_ttl: TEST_HEARTBEAT_TTL,
            state_ttls: StateTtls::default(),
            forward_timeout: TEST_FORWARD_TIMEOUT,
        }
    }

    /// Build and start a node with the default test settings.
    pub async fn spawn_node(&self, node_id: &str) -> TestNode {
        self.spawn_node_with(Self::settings(node_id)).await
    }

    pub async fn spawn_node_with(&self, settings: NodeSettings) -> TestNode {
        let capture = MockCaptureBackend::new();
        let node = Arc::new(BoardNode::new(
            settings,
            self.state.clone(),
            Arc::new(self.bus.clone()),
            Arc::new(capture.clone()),
            Arc::new(JwtAuthenticator::new(&test_secret())),
        ));
        let cancel_token = CancellationToken::new();
        let tasks = node
            .start(&cancel_token)
            .await
            .expect("test node failed to start");

        TestNode {
            node,
            capture,
            cancel_token,
            tasks,
        }
    }
}

/// One running node of a [`TestCluster`].
pub struct TestNode {
    pub node: Arc<BoardNode>,
    pub capture: MockCaptureBackend,
    cancel_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl TestNode {
    pub fn id(&self) -> &NodeId {
        self.node.node_id()
    }

    /// Attach an authenticated socket for `user`.
    pub async fn connect(&self, user: &TestUser) -> TestSocket {
        let id = SocketId::generate();
        let rx = self.node.hub.register(id.clone()).await;
        self.node.hub.set_user(&id, user.socket_user()).await;
        TestSocket { id, rx }
    }

    pub async fn join(&self, socket: &TestSocket, room: &str) -> JoinOutcome {
        self.node
            .rooms
            .join_room(&socket.id, room)
            .await
            .expect("join_room failed")
    }

    /// Dispatch a client event exactly as the gateway would.
    pub async fn send(&self, socket: &TestSocket, event: ClientEvent) {
        handle_client_event(&self.node, &socket.id, event).await;
    }

    pub async fn disconnect(&self, socket: &TestSocket) {
        self.node.rooms.on_disconnecting(&socket.id).await;
    }

    /// Stop the node the way a crash would: tasks and heartbeat end, nothing
    /// it owns in the cluster store is cleaned up.
    pub async fn crash(self) {
        self.cancel_token.cancel();
        self.node.presence.stop().await;
        for task in self.tasks {
            let _ = task.await;
        }
    }

    /// Graceful shutdown, including the node-scoped clear.
    pub async fn shutdown(self) {
        self.node.shutdown().await;
        self.cancel_token.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// A socket attached to a [`TestNode`].
pub struct TestSocket {
    pub id: SocketId,
    pub rx: mpsc::Receiver<ServerEvent>,
}

impl TestSocket {
    /// Next event, or `None` after [`EVENT_WAIT`].
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        tokio::time::timeout(EVENT_WAIT, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Events already queued, without waiting.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait for the first event matching `predicate`, discarding the rest.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<ServerEvent>
    where
        F: FnMut(&ServerEvent) -> bool,
    {
        loop {
            let event = self.next_event().await?;
            if predicate(&event) {
                return Some(event);
            }
        }
    }

    /// Wait for the next event named `name` (kebab-case wire name).
    pub async fn wait_for_named(&mut self, name: &str) -> Option<ServerEvent> {
        self.wait_for(|event| event.name() == name).await
    }
}
