//! Common utilities and types shared across the whiteboard services.

#![warn(clippy::pedantic)]

/// Module for identifier types (rooms, users, nodes, sockets)
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for user token claims and pre-verification checks
pub mod jwt;
