//! Background tasks.
//!
//! - `sweep`: periodic reclamation of state owned by dead nodes
//! - `bus_listener`: consumes the cluster bus
//!
//! The heartbeat loop lives with [`crate::presence::NodePresence`].

pub mod bus_listener;
pub mod sweep;

pub use bus_listener::start_bus_listener;
pub use sweep::{start_sweep_task, sweep_interval};
