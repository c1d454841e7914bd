//! Wiring of one board node.
//!
//! [`BoardNode`] owns every service of a process and the order in which they
//! start and stop.

use crate::auth::Authenticator;
use crate::cluster::{ClusterService, StateTtls};
use crate::config::Config;
use crate::errors::BoardError;
use crate::presence::{LivenessProbe, NodePresence};
use crate::recording::{CaptureBackend, RecordingService, ResourceRegistry};
use crate::rooms::RoomLifecycleService;
use crate::store::DistributedState;
use crate::tasks::{self, sweep};
use crate::transport::{Broadcaster, ClusterBus, SocketHub};
use common::types::NodeId;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Per-node timing settings.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub node_id: NodeId,
    pub heartbeat_ttl: Duration,
    pub state_ttls: StateTtls,
    pub forward_timeout: Duration,
}

impl NodeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            node_id: config.node_id.clone(),
            heartbeat_ttl: config.heartbeat_ttl(),
            state_ttls: config.state_ttls(),
            forward_timeout: config.forward_timeout(),
        }
    }
}

pub struct BoardNode {
    pub settings: NodeSettings,
    pub state: DistributedState,
    pub presence: Arc<NodePresence>,
    pub cluster: Arc<ClusterService>,
    pub hub: Arc<SocketHub>,
    pub bus: Arc<dyn ClusterBus>,
    pub broadcaster: Arc<Broadcaster>,
    pub registry: Arc<ResourceRegistry>,
    pub rooms: Arc<RoomLifecycleService>,
    pub recordings: Arc<RecordingService>,
    pub authenticator: Arc<dyn Authenticator>,
}

impl BoardNode {
    pub fn new(
        settings: NodeSettings,
        state: DistributedState,
        bus: Arc<dyn ClusterBus>,
        capture: Arc<dyn CaptureBackend>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let node_id = settings.node_id.clone();

        let presence = Arc::new(NodePresence::new(
            node_id.clone(),
            state.clone(),
            settings.heartbeat_ttl,
        ));
        let cluster = Arc::new(ClusterService::new(
            state.clone(),
            Arc::clone(&presence) as Arc<dyn LivenessProbe>,
            node_id.clone(),
            settings.state_ttls,
        ));
        let hub = Arc::new(SocketHub::new());
        let broadcaster = Arc::new(Broadcaster::new(
            node_id.clone(),
            Arc::clone(&hub),
            Arc::clone(&bus),
        ));
        let registry = Arc::new(ResourceRegistry::new());
        let rooms = Arc::new(RoomLifecycleService::new(
            node_id.clone(),
            Arc::clone(&cluster),
            Arc::clone(&broadcaster),
            Arc::clone(&registry),
        ));
        let recordings = Arc::new(RecordingService::new(
            node_id,
            Arc::clone(&cluster),
            Arc::clone(&broadcaster),
            Arc::clone(&registry),
            capture,
            settings.forward_timeout,
        ));

        Self {
            settings,
            state,
            presence,
            cluster,
            hub,
            bus,
            broadcaster,
            registry,
            rooms,
            recordings,
            authenticator,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.settings.node_id
    }

    /// Start heartbeating, subscribe to the bus and spawn the sweep.
    ///
    /// # Errors
    ///
    /// Fails if the first heartbeat write or the bus subscription fails.
    pub async fn start(
        &self,
        cancel_token: &CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, BoardError> {
        self.presence.start().await?;
        let feed = self.bus.subscribe().await?;

        let bus_task = tokio::spawn(tasks::start_bus_listener(
            feed,
            Arc::clone(&self.broadcaster),
            Arc::clone(&self.recordings),
            cancel_token.child_token(),
        ));
        let sweep_task = tokio::spawn(tasks::start_sweep_task(
            Arc::clone(&self.cluster),
            Arc::clone(&self.rooms),
            Arc::clone(&self.broadcaster),
            tasks::sweep_interval(self.settings.heartbeat_ttl),
            cancel_token.child_token(),
        ));

        info!(target: "board.node", node_id = %self.node_id(), "Board node started");
        Ok(vec![bus_task, sweep_task])
    }

    /// Release this node's cluster state and stop heartbeating.
    pub async fn shutdown(&self) {
        match self.cluster.clear_node_state(self.node_id()).await {
            Ok(cleared) => sweep::publish_cleared(&self.rooms, &self.broadcaster, &cleared).await,
            Err(e) => {
                warn!(target: "board.node", error = %e, "Failed to clear node state on shutdown");
            }
        }
        self.registry.release_all().await;
        self.presence.stop().await;
        info!(target: "board.node", node_id = %self.node_id(), "Board node stopped");
    }
}
