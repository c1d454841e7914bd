//! # Board Test Utilities
//!
//! Shared test utilities for the board service.
//!
//! - `fixtures` - Test users and signed socket tokens
//! - `mock_capture` - Capture backend that counts sessions and can fail on demand
//! - `cluster_harness` - Several board nodes in one process over a shared
//!   in-memory store and bus
//!
//! ## Usage
//!
//! ```rust,ignore
//! use board_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let cluster = TestCluster::new();
//!     let node_a = cluster.spawn_node("node-a").await;
//!     let node_b = cluster.spawn_node("node-b").await;
//!
//!     let mut alice = node_a.connect(&TestUser::new("alice")).await;
//!     node_a.join(&alice, "room-1").await;
//!     assert!(alice.next_event().await.is_some());
//! }
//! ```

pub mod cluster_harness;
pub mod fixtures;
pub mod mock_capture;

pub use cluster_harness::*;
pub use fixtures::*;
pub use mock_capture::*;
