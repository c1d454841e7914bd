//! Board Service Library
//!
//! Coordination backend for a collaborative whiteboard running as several
//! stateless socket nodes behind a load balancer:
//!
//! - Room membership and syncer election across nodes
//! - Presentation and recording state shared through Redis
//! - Node heartbeats so state owned by a crashed node is reclaimed
//! - Cross-node relay of events and recording stop commands
//!
//! # Architecture
//!
//! ```text
//! gateway -> rooms / recording -> cluster -> store
//!                  |                  |
//!                  v                  v
//!              transport           presence
//! ```
//!
//! Every record in the shared store names the node that owns it. A record
//! whose owner stopped heartbeating is stale: readers evict it on sight and
//! the periodic sweep reclaims the rest.
//!
//! # Modules
//!
//! - [`store`] - TTL'd value/hash store (Redis or in-memory)
//! - [`presence`] - Node heartbeat and liveness
//! - [`cluster`] - Typed room state and the dead-node sweep
//! - [`rooms`] - Join/leave protocol, syncer election, presentations
//! - [`recording`] - Recording control and cross-node stop forwarding
//! - [`transport`] - Socket hub, cluster bus, broadcaster
//! - [`gateway`] - WebSocket endpoint
//! - [`tasks`] - Background loops
//! - [`observability`] - Health endpoints and metrics

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod auth;
pub mod cluster;
pub mod config;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod node;
pub mod observability;
pub mod presence;
pub mod recording;
pub mod rooms;
pub mod store;
pub mod tasks;
pub mod transport;
