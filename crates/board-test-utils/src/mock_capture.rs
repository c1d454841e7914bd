//! Capture backend double.
//!
//! # Example
//!
//! ```rust,ignore
//! let capture = MockCaptureBackend::new();
//! capture.fail_next();
//! // next start_recording fails with an internal error
//! assert_eq!(capture.started(), 0);
//! ```

use async_trait::async_trait;
use board_service::errors::BoardError;
use board_service::recording::{CaptureBackend, LocalResource};
use common::types::{RoomId, UserId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts started and released capture sessions.
#[derive(Debug, Clone, Default)]
pub struct MockCaptureBackend {
    started: Arc<AtomicUsize>,
    stopped: Arc<AtomicUsize>,
    fail_next: Arc<AtomicBool>,
}

impl MockCaptureBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `start` call fail.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sessions started and not yet released.
    pub fn active(&self) -> usize {
        self.started() - self.stopped()
    }
}

#[async_trait]
impl CaptureBackend for MockCaptureBackend {
    async fn start(
        &self,
        _room_id: &RoomId,
        _user_id: &UserId,
        _upload_token: &str,
    ) -> Result<Box<dyn LocalResource>, BoardError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(BoardError::Capture("mock capture refused to start".to_string()));
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockCaptureHandle {
            stopped: Arc::clone(&self.stopped),
        }))
    }
}

struct MockCaptureHandle {
    stopped: Arc<AtomicUsize>,
}

#[async_trait]
impl LocalResource for MockCaptureHandle {
    async fn release(self: Box<Self>) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}
