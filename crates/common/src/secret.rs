//! Secret wrappers for values that must never reach logs.
//!
//! Re-exports [`secrecy`] so every crate in the workspace reaches for the
//! same types. `SecretString` redacts itself in `Debug`, which makes derived
//! `Debug` impls on config and request structs safe to log.
//!
//! Values held here:
//! - the Redis connection URL (may embed a password)
//! - the JWT signing secret used to verify socket tokens
//! - recording upload tokens supplied by clients
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct StoreSettings {
//!     node_id: String,
//!     redis_url: SecretString,
//! }
//!
//! let settings = StoreSettings {
//!     node_id: "board-1".to_string(),
//!     redis_url: SecretString::from("redis://:hunter2@cache:6379"),
//! };
//!
//! assert!(!format!("{settings:?}").contains("hunter2"));
//! let url: &str = settings.redis_url.expose_secret();
//! assert!(url.starts_with("redis://"));
//! ```

pub use secrecy::{ExposeSecret, SecretString};
