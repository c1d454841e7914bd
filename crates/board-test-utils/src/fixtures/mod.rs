//! Test users and socket tokens.

use board_service::transport::SocketUser;
use chrono::Utc;
use common::jwt::UserClaims;
use common::secret::SecretString;
use common::types::UserId;
use jsonwebtoken::{encode, EncodingKey, Header};

/// Shared secret used by every test node's authenticator.
pub const TEST_JWT_SECRET: &str = "board-test-secret-do-not-use-in-production";

pub fn test_secret() -> SecretString {
    SecretString::from(TEST_JWT_SECRET)
}

/// Test user fixture.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub user_id: String,
    pub username: String,
    pub read_only: bool,
}

impl TestUser {
    /// Create a user whose display name equals its id.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            username: user_id.clone(),
            user_id,
            read_only: false,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.username = name.into();
        self
    }

    /// Mark the user as a viewer.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn id(&self) -> UserId {
        UserId::new(self.user_id.clone())
    }

    pub fn socket_user(&self) -> SocketUser {
        SocketUser {
            user_id: self.id(),
            username: self.username.clone(),
            read_only: self.read_only,
        }
    }

    /// Claims valid for one hour from now.
    pub fn claims(&self) -> UserClaims {
        let now = Utc::now().timestamp();
        UserClaims {
            sub: self.user_id.clone(),
            name: self.username.clone(),
            read_only: self.read_only,
            exp: now + 3600,
            iat: now,
        }
    }

    /// HS256 token signed with [`TEST_JWT_SECRET`].
    pub fn token(&self) -> String {
        sign_claims(&self.claims())
    }
}

/// Sign arbitrary claims with [`TEST_JWT_SECRET`].
pub fn sign_claims(claims: &UserClaims) -> String {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("HS256 encoding of test claims cannot fail")
}
