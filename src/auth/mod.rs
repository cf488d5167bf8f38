//! Bearer token authentication

mod jwt;

pub use jwt::{issue_token, verify_token, Claims, JwtError};

use crate::models::Actor;

/// Verifies access tokens with the shared HS256 secret
pub struct AuthService {
    jwt_secret: String,
}

impl AuthService {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
        }
    }

    pub fn jwt_secret(&self) -> &str {
        &self.jwt_secret
    }

    pub fn authenticate(&self, token: &str) -> Result<Actor, JwtError> {
        verify_token(token, &self.jwt_secret)?.actor()
    }

    /// Token for `actor`, valid for `ttl_seconds`
    pub fn issue(&self, actor: &Actor, ttl_seconds: i64) -> Result<String, JwtError> {
        issue_token(actor, &self.jwt_secret, ttl_seconds)
    }
}
