//! Cluster bus consumer.
//!
//! Applies relayed socket/room emits and drives the recording stop protocol.

use crate::recording::RecordingService;
use crate::transport::{Broadcaster, BusEnvelope, BusMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Consume `feed` until it closes or the token is cancelled.
#[instrument(skip_all, name = "board.task.bus")]
pub async fn start_bus_listener(
    mut feed: mpsc::Receiver<BusEnvelope>,
    broadcaster: Arc<Broadcaster>,
    recordings: Arc<RecordingService>,
    cancel_token: CancellationToken,
) {
    info!(target: "board.task.bus", "Starting bus listener");

    loop {
        tokio::select! {
            envelope = feed.recv() => {
                let Some(envelope) = envelope else {
                    error!(target: "board.task.bus", "Bus feed closed unexpectedly");
                    break;
                };
                handle_bus_message(&broadcaster, &recordings, envelope).await;
            }
            () = cancel_token.cancelled() => {
                info!(target: "board.task.bus", "Bus listener received shutdown signal, exiting");
                break;
            }
        }
    }
}

pub async fn handle_bus_message(
    broadcaster: &Broadcaster,
    recordings: &RecordingService,
    envelope: BusEnvelope,
) {
    match &envelope.message {
        BusMessage::EmitToSocket { .. } | BusMessage::EmitToRoom { .. } => {
            broadcaster.deliver_local(&envelope).await;
        }
        BusMessage::StopRecording {
            request_id,
            room_id,
            user_id,
            requester_socket_id,
        } => {
            let result = recordings
                .handle_forwarded_stop(
                    &envelope.origin,
                    *request_id,
                    room_id,
                    user_id,
                    requester_socket_id,
                )
                .await;
            match result {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        target: "board.task.bus",
                        request_id = %request_id,
                        "Recording stop not held here"
                    );
                }
                Err(e) => {
                    warn!(
                        target: "board.task.bus",
                        request_id = %request_id,
                        error = %e,
                        "Failed to stop forwarded recording"
                    );
                }
            }
        }
        BusMessage::StopRecordingClaimed { request_id, target } => {
            recordings.handle_claim(*request_id, target).await;
        }
    }
}
