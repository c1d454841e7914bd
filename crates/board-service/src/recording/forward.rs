//! Outstanding cross-node stop requests awaiting a claim.

use std::collections::HashMap;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct PendingForwards {
    waiting: Mutex<HashMap<Uuid, oneshot::Sender<()>>>,
}

impl PendingForwards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for a claim on `request_id`.
    pub async fn register(&self, request_id: Uuid) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().await.insert(request_id, tx);
        rx
    }

    /// Wake the waiter for `request_id`. Returns false if nobody is waiting.
    pub async fn resolve(&self, request_id: Uuid) -> bool {
        match self.waiting.lock().await.remove(&request_id) {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub async fn cancel(&self, request_id: Uuid) {
        self.waiting.lock().await.remove(&request_id);
    }

    pub async fn len(&self) -> usize {
        self.waiting.lock().await.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_wakes_waiter_once() {
        let pending = PendingForwards::new();
        let id = Uuid::new_v4();
        let rx = pending.register(id).await;

        assert!(pending.resolve(id).await);
        assert!(rx.await.is_ok());
        assert!(!pending.resolve(id).await);
    }

    #[tokio::test]
    async fn test_cancel_drops_waiter() {
        let pending = PendingForwards::new();
        let id = Uuid::new_v4();
        let rx = pending.register(id).await;

        pending.cancel(id).await;
        assert!(rx.await.is_err());
        assert_eq!(pending.len().await, 0);
    }
}
