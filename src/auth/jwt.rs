//! JWT access tokens
//!
//! Tokens are issued by the identity service; this backend only verifies
//! them. `issue_token` exists for local tooling and tests.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Actor, Role};

/// JWT-related errors
#[derive(Error, Debug)]
pub enum JwtError {
    #[error("Token encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Token decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

fn default_token_type() -> String {
    "access".to_string()
}

/// JWT claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (customer, partner or admin id)
    pub sub: String,
    pub role: String,
    #[serde(default)]
    pub iat: i64,
    pub exp: i64,
    /// Older tokens carry no type and are treated as access tokens
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

impl Claims {
    /// The actor these claims authenticate
    pub fn actor(&self) -> Result<Actor, JwtError> {
        if self.token_type != "access" {
            return Err(JwtError::InvalidToken("Expected access token".to_string()));
        }
        let id = Uuid::parse_str(&self.sub)
            .map_err(|_| JwtError::InvalidToken("Invalid subject".to_string()))?;
        let role = Role::parse(&self.role)
            .ok_or_else(|| JwtError::InvalidToken(format!("Unknown role '{}'", self.role)))?;
        Ok(Actor::new(id, role))
    }
}

/// Sign an HS256 access token for an actor
pub fn issue_token(actor: &Actor, secret: &str, ttl_seconds: i64) -> Result<String, JwtError> {
    let now = Utc::now();
    let claims = Claims {
        sub: actor.id.to_string(),
        role: actor.role.as_str().to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::seconds(ttl_seconds)).timestamp(),
        token_type: default_token_type(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| JwtError::EncodingFailed(e.to_string()))
}

/// Verify signature and expiry and decode the claims
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let mut validation = Validation::default();
    validation.validate_exp = true;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => JwtError::TokenExpired,
        _ => JwtError::DecodingFailed(e.to_string()),
    })?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify() {
        let actor = Actor::partner(Uuid::new_v4());
        let token = issue_token(&actor, "test-secret-key", 900).unwrap();

        let claims = verify_token(&token, "test-secret-key").unwrap();
        assert_eq!(claims.role, "partner");
        assert_eq!(claims.actor().unwrap(), actor);
    }

    #[test]
    fn test_wrong_secret() {
        let token = issue_token(&Actor::customer(Uuid::new_v4()), "secret1", 900).unwrap();
        assert!(verify_token(&token, "secret2").is_err());
    }

    #[test]
    fn test_expired_token() {
        let token = issue_token(&Actor::admin(Uuid::new_v4()), "secret", -3600).unwrap();
        assert!(matches!(
            verify_token(&token, "secret"),
            Err(JwtError::TokenExpired)
        ));
    }

    #[test]
    fn test_legacy_user_role_maps_to_customer() {
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            role: "user".to_string(),
            iat: 0,
            exp: 0,
            token_type: default_token_type(),
        };
        assert_eq!(claims.actor().unwrap().role, Role::Customer);

        let refresh = Claims {
            token_type: "refresh".to_string(),
            ..claims
        };
        assert!(refresh.actor().is_err());
    }
}
