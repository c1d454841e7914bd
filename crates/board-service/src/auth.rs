//! Socket authentication.
//!
//! A socket's first frame carries a token; an [`Authenticator`] turns it into
//! the [`SocketUser`] the rest of the service works with.

use crate::errors::BoardError;
use crate::transport::SocketUser;
use common::jwt::{check_token_size, validate_iat, UserClaims, DEFAULT_CLOCK_SKEW};
use common::secret::{ExposeSecret, SecretString};
use common::types::UserId;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use tracing::debug;

pub trait Authenticator: Send + Sync {
    /// # Errors
    ///
    /// Returns `BoardError::Unauthenticated` for any unusable token.
    fn authenticate(&self, token: &str) -> Result<SocketUser, BoardError>;
}

/// HS256 token verification with a shared secret.
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &SecretString) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            decoding_key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
        }
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<SocketUser, BoardError> {
        check_token_size(token).map_err(|e| {
            debug!(target: "board.auth", error = %e, "Token rejected before decoding");
            BoardError::Unauthenticated
        })?;

        let claims = decode::<UserClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                debug!(target: "board.auth", error = %e, "Token verification failed");
                BoardError::Unauthenticated
            })?
            .claims;

        validate_iat(claims.iat, DEFAULT_CLOCK_SKEW).map_err(|e| {
            debug!(target: "board.auth", error = %e, "Token iat rejected");
            BoardError::Unauthenticated
        })?;

        if claims.sub.trim().is_empty() {
            return Err(BoardError::Unauthenticated);
        }

        let username = if claims.name.trim().is_empty() {
            claims.sub.clone()
        } else {
            claims.name
        };
        Ok(SocketUser {
            user_id: UserId::new(claims.sub),
            username,
            read_only: claims.read_only,
        })
    }
}
