//! User token claims and pre-verification checks.
//!
//! Socket connections authenticate with a short-lived HS256 JWT issued by the
//! host application. This module owns the claims shape and the checks that run
//! around signature verification:
//! - size limit, checked before any parsing
//! - `iat` bound with a configurable clock skew
//!
//! Signature verification itself lives with the service that owns the key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Maximum accepted token size in bytes (8KB).
///
/// Oversized tokens are rejected before base64 decoding or HMAC work.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default clock skew tolerance for `iat` (5 minutes).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Errors produced by the checks in this module.
///
/// Messages are intentionally identical so clients cannot probe which check failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

/// Claims carried by a user socket token.
///
/// `sub` and `name` identify a person and are redacted in Debug output.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserClaims {
    /// Subject (user id).
    pub sub: String,

    /// Display name shown to other room members.
    #[serde(default)]
    pub name: String,

    /// Read-only users can view a room but never hold the syncer role,
    /// present, or record.
    #[serde(default, rename = "readOnly")]
    pub read_only: bool,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,
}

impl fmt::Debug for UserClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClaims")
            .field("sub", &"[REDACTED]")
            .field("name", &"[REDACTED]")
            .field("read_only", &self.read_only)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .finish()
    }
}

/// Reject tokens larger than [`MAX_JWT_SIZE_BYTES`].
///
/// # Errors
///
/// Returns `JwtValidationError::TokenTooLarge` for oversized input.
pub fn check_token_size(token: &str) -> Result<(), JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }
    Ok(())
}

/// Validate that `iat` is not further in the future than `clock_skew`.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` when the token claims to
/// have been issued after `now + clock_skew`.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    let clock_skew_secs = i64::try_from(clock_skew.as_secs()).unwrap_or(i64::MAX);
    let max_iat = now.saturating_add(clock_skew_secs);

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}
