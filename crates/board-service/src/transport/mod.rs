//! Socket and cluster transport.
//!
//! - [`SocketHub`]: sockets connected to this process
//! - [`ClusterBus`]: node-to-node messages ([`RedisBus`] or [`MemoryBus`])
//! - [`Broadcaster`]: delivers events to sockets wherever they are connected

pub mod broadcaster;
pub mod bus;
pub mod hub;
pub mod redis_bus;

pub use broadcaster::Broadcaster;
pub use bus::{BusEnvelope, BusMessage, ClusterBus, MemoryBus};
pub use hub::{SocketHub, SocketUser};
pub use redis_bus::RedisBus;
