//! Dead-node sweep background task.
//!
//! Every node periodically runs [`ClusterService::sweep`] and then tells the
//! affected rooms what went away:
//! 1. `user-stopped-presenting` for each cleared presentation
//! 2. `user-stopped-recording` for each cleared recording entry
//! 3. a fresh `room-user-change` for rooms that lost members
//! 4. `find_new_syncer` for rooms that lost their syncer or any member
//!
//! Several nodes may sweep the same orphan concurrently; clients tolerate the
//! duplicate notifications.
//!
//! # Graceful Shutdown
//!
//! The task exits when its cancellation token is triggered. An iteration in
//! progress runs to completion first.

use crate::cluster::{ClearedState, ClusterService};
use crate::events::ServerEvent;
use crate::rooms::RoomLifecycleService;
use crate::transport::Broadcaster;
use common::types::RoomId;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Floor for the sweep interval.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(2);

/// Sweep period for a heartbeat TTL: `max(2s, ttl / 2)`.
pub fn sweep_interval(heartbeat_ttl: Duration) -> Duration {
    (heartbeat_ttl / 2).max(MIN_SWEEP_INTERVAL)
}

/// Run the sweep every `interval` until cancelled.
#[instrument(skip_all, name = "board.task.sweep")]
pub async fn start_sweep_task(
    cluster: Arc<ClusterService>,
    rooms: Arc<RoomLifecycleService>,
    broadcaster: Arc<Broadcaster>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "board.task.sweep",
        interval_ms = interval.as_millis(),
        "Starting sweep task"
    );

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_sweep(&cluster, &rooms, &broadcaster).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "board.task.sweep",
                    "Sweep task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "board.task.sweep", "Sweep task stopped");
}

/// One sweep iteration plus its room notifications.
pub async fn run_sweep(
    cluster: &ClusterService,
    rooms: &RoomLifecycleService,
    broadcaster: &Broadcaster,
) -> ClearedState {
    match cluster.sweep().await {
        Ok(cleared) => {
            publish_cleared(rooms, broadcaster, &cleared).await;
            cleared
        }
        Err(e) => {
            warn!(target: "board.task.sweep", error = %e, "Sweep failed");
            ClearedState::default()
        }
    }
}

/// Notify rooms about reclaimed state and re-elect syncers where needed.
pub async fn publish_cleared(
    rooms: &RoomLifecycleService,
    broadcaster: &Broadcaster,
    cleared: &ClearedState,
) {
    for (room_id, session) in &cleared.presentations_cleared {
        broadcaster
            .emit_to_room(
                room_id,
                ServerEvent::UserStoppedPresenting {
                    user_id: session.presenter_id.clone(),
                },
                None,
            )
            .await;
    }

    for (room_id, entry) in &cleared.recordings_cleared {
        broadcaster
            .emit_to_room(
                room_id,
                ServerEvent::UserStoppedRecording {
                    user_id: entry.user_id.clone(),
                },
                None,
            )
            .await;
    }

    let member_rooms: BTreeSet<&RoomId> =
        cleared.members_cleared.iter().map(|(room, _)| room).collect();
    for room_id in member_rooms {
        if let Err(e) = rooms.broadcast_membership(room_id).await {
            warn!(
                target: "board.task.sweep",
                room_id = %room_id,
                error = %e,
                "Failed to re-broadcast membership"
            );
        }
    }

    // Syncers evicted on the read path show up here only as member losses
    let election_rooms: BTreeSet<&RoomId> = cleared
        .syncers_cleared
        .iter()
        .map(|(room, _)| room)
        .chain(cleared.members_cleared.iter().map(|(room, _)| room))
        .collect();
    for room_id in election_rooms {
        if let Err(e) = rooms.find_new_syncer(room_id).await {
            warn!(
                target: "board.task.sweep",
                room_id = %room_id,
                error = %e,
                "Failed to re-elect syncer"
            );
        }
    }
}
