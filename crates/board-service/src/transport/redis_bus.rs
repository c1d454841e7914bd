//! Redis pub/sub implementation of [`ClusterBus`].
//!
//! All envelopes travel as JSON on the single channel [`BUS_CHANNEL`].
//! Publishing uses the shared multiplexed connection; each subscription opens
//! a dedicated pub/sub connection.
//!
//! # Reconnection
//!
//! When the pub/sub connection drops, the subscription task reopens it with
//! exponential backoff ([`resubscribe_delay`]) until the receiver is dropped.
//! Messages published while disconnected are lost. Readiness reports the bus
//! as down for the duration when a [`HealthState`] is attached.

use crate::errors::BoardError;
use crate::observability::{metrics, HealthState};
use crate::store::RedisBackend;
use crate::transport::bus::{BusEnvelope, ClusterBus, BUS_QUEUE_CAPACITY};
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Msg};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const BUS_CHANNEL: &str = "board:bus";

/// Delay before the first resubscribe attempt.
pub const INITIAL_RESUBSCRIBE_DELAY: Duration = Duration::from_millis(250);

/// Upper bound for the resubscribe backoff.
pub const MAX_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(30);

type EnvelopeStream = BoxStream<'static, BusEnvelope>;

/// Backoff before resubscribe attempt `attempt` (1-based): doubling from
/// [`INITIAL_RESUBSCRIBE_DELAY`], capped at [`MAX_RESUBSCRIBE_DELAY`].
pub fn resubscribe_delay(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    INITIAL_RESUBSCRIBE_DELAY
        .saturating_mul(factor)
        .min(MAX_RESUBSCRIBE_DELAY)
}

#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    connection: MultiplexedConnection,
    health: Option<Arc<HealthState>>,
}

impl RedisBus {
    /// Share the client and connection of an existing store backend.
    pub fn from_backend(backend: &RedisBackend) -> Self {
        Self {
            client: backend.client().clone(),
            connection: backend.connection(),
            health: None,
        }
    }

    /// Report subscription drops through `health`.
    #[must_use]
    pub fn with_health(mut self, health: Arc<HealthState>) -> Self {
        self.health = Some(health);
        self
    }
}

#[async_trait::async_trait]
impl ClusterBus for RedisBus {
    async fn publish(&self, envelope: &BusEnvelope) -> Result<(), BoardError> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.connection.clone();

        let _: i64 = conn
            .publish(BUS_CHANNEL, payload)
            .await
            .map_err(|e| {
                debug!(target: "board.bus", error = %e, "Publish failed");
                BoardError::Bus(format!("publish failed: {e}"))
            })?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<BusEnvelope>, BoardError> {
        let initial = open_stream(&self.client).await?;
        info!(target: "board.bus", channel = BUS_CHANNEL, "Subscribed to cluster bus");

        let (tx, rx) = mpsc::channel(BUS_QUEUE_CAPACITY);
        let client = self.client.clone();
        let health = self.health.clone();
        tokio::spawn(async move {
            run_subscription(
                initial,
                move || {
                    let client = client.clone();
                    async move { open_stream(&client).await }
                },
                tx,
                health,
            )
            .await;
        });

        Ok(rx)
    }
}

/// Open a pub/sub connection on [`BUS_CHANNEL`] and decode its messages.
async fn open_stream(client: &Client) -> Result<EnvelopeStream, BoardError> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| BoardError::Bus(format!("Failed to open pub/sub connection: {e}")))?;
    pubsub
        .subscribe(BUS_CHANNEL)
        .await
        .map_err(|e| BoardError::Bus(format!("Failed to subscribe: {e}")))?;

    Ok(pubsub
        .into_on_message()
        .filter_map(|msg| async move { decode_message(&msg) })
        .boxed())
}

fn decode_message(msg: &Msg) -> Option<BusEnvelope> {
    let payload: String = match msg.get_payload() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(target: "board.bus", error = %e, "Unreadable bus payload");
            return None;
        }
    };
    match serde_json::from_str(&payload) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            warn!(target: "board.bus", error = %e, "Undecodable bus envelope");
            None
        }
    }
}

/// Forward `stream` into `tx`, reopening it through `connect` whenever it
/// ends. Returns once the receiving side of `tx` is dropped.
async fn run_subscription<C, Fut>(
    mut stream: EnvelopeStream,
    mut connect: C,
    tx: mpsc::Sender<BusEnvelope>,
    health: Option<Arc<HealthState>>,
) where
    C: FnMut() -> Fut,
    Fut: Future<Output = Result<EnvelopeStream, BoardError>>,
{
    let set_connected = |connected: bool| {
        if let Some(health) = &health {
            health.set_bus_connected(connected);
        }
    };

    loop {
        loop {
            tokio::select! {
                () = tx.closed() => {
                    debug!(target: "board.bus", "Bus receiver dropped, ending subscription");
                    return;
                }
                next = stream.next() => match next {
                    Some(envelope) => {
                        if tx.send(envelope).await.is_err() {
                            return;
                        }
                    }
                    None => break,
                },
            }
        }

        set_connected(false);
        warn!(
            target: "board.bus",
            channel = BUS_CHANNEL,
            "Cluster bus subscription dropped, resubscribing"
        );

        let mut attempt: u32 = 0;
        stream = loop {
            attempt = attempt.saturating_add(1);
            let delay = resubscribe_delay(attempt);
            tokio::select! {
                () = tx.closed() => return,
                () = tokio::time::sleep(delay) => {}
            }

            match connect().await {
                Ok(reopened) => break reopened,
                Err(e) => {
                    warn!(
                        target: "board.bus",
                        error = %e,
                        attempt = attempt,
                        delay_ms = delay.as_millis(),
                        "Cluster bus resubscribe failed"
                    );
                }
            }
        };

        metrics::record_bus_resubscribe();
        set_connected(true);
        info!(
            target: "board.bus",
            channel = BUS_CHANNEL,
            attempts = attempt,
            "Resubscribed to cluster bus"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::events::ServerEvent;
    use crate::transport::bus::BusMessage;
    use common::types::{NodeId, RoomId};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc::error::TryRecvError;

    fn envelope(room: &str) -> BusEnvelope {
        BusEnvelope {
            origin: NodeId::new("node-a"),
            message: BusMessage::EmitToRoom {
                room_id: RoomId::new(room),
                event: ServerEvent::SyncDesignate { is_syncer: false },
                except: None,
            },
        }
    }

    /// Stream that yields `rooms` and then ends, like a dropped connection.
    fn finite(rooms: &[&str]) -> EnvelopeStream {
        let items: Vec<BusEnvelope> = rooms.iter().map(|room| envelope(room)).collect();
        futures::stream::iter(items).boxed()
    }

    /// Stream that never yields and never ends.
    fn idle() -> EnvelopeStream {
        futures::stream::pending::<BusEnvelope>().boxed()
    }

    /// Connector replaying scripted results; `None` entries fail.
    fn scripted(
        script: Vec<Option<EnvelopeStream>>,
    ) -> (
        Arc<Mutex<u32>>,
        impl FnMut() -> std::future::Ready<Result<EnvelopeStream, BoardError>>,
    ) {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let mut script: VecDeque<Option<EnvelopeStream>> = script.into();
        let connect = move || {
            *counter.lock().unwrap() += 1;
            let next = script.pop_front().flatten();
            std::future::ready(next.ok_or_else(|| BoardError::Bus("connection refused".into())))
        };
        (calls, connect)
    }

    #[test]
    fn test_resubscribe_delay_doubles_up_to_cap() {
        assert_eq!(resubscribe_delay(1), Duration::from_millis(250));
        assert_eq!(resubscribe_delay(2), Duration::from_millis(500));
        assert_eq!(resubscribe_delay(5), Duration::from_secs(4));
        assert_eq!(resubscribe_delay(9), MAX_RESUBSCRIBE_DELAY);
        assert_eq!(resubscribe_delay(u32::MAX), MAX_RESUBSCRIBE_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_subscription_is_reopened() {
        let (tx, mut rx) = mpsc::channel(8);
        let (calls, connect) = scripted(vec![Some(finite(&["after"]))]);
        let health = Arc::new(HealthState::new());

        let task = tokio::spawn(run_subscription(
            finite(&["before"]),
            connect,
            tx,
            Some(Arc::clone(&health)),
        ));

        assert_eq!(rx.recv().await.unwrap(), envelope("before"));
        assert_eq!(rx.recv().await.unwrap(), envelope("after"));
        assert!(*calls.lock().unwrap() >= 1);

        drop(rx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failures_back_off_and_mark_bus_down() {
        let (tx, mut rx) = mpsc::channel(8);
        let (calls, connect) = scripted(vec![None, None, Some(idle())]);
        let health = Arc::new(HealthState::new());

        let task = tokio::spawn(run_subscription(
            finite(&[]),
            connect,
            tx,
            Some(Arc::clone(&health)),
        ));

        // First attempt after 250ms fails, second after a further 500ms fails.
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(*calls.lock().unwrap(), 2);
        assert!(!health.is_bus_connected());

        // Third attempt waits 1s and succeeds.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*calls.lock().unwrap(), 3);
        assert!(health.is_bus_connected());
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);

        drop(rx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_ends_when_receiver_is_dropped() {
        let (tx, rx) = mpsc::channel(8);
        let (calls, connect) = scripted(Vec::new());

        let task = tokio::spawn(run_subscription(idle(), connect, tx, None));
        drop(rx);

        task.await.unwrap();
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receiver_dropped_during_backoff_stops_retrying() {
        let (tx, rx) = mpsc::channel(8);
        let (calls, connect) = scripted(Vec::new());

        let task = tokio::spawn(run_subscription(finite(&[]), connect, tx, None));
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(rx);

        task.await.unwrap();
        assert_eq!(*calls.lock().unwrap(), 0);
    }
}
