//! Authentication extractors
//!
//! Handlers take an [`AuthenticatedUser`] (or one of the role-gated wrappers)
//! to require a valid bearer token.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::Serialize;
use std::sync::Arc;

use crate::auth::{AuthService, JwtError};
use crate::models::{Actor, Role};

/// Caller authenticated from the `Authorization: Bearer` header
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub Actor);

/// Error response for authentication failures
#[derive(Debug, Serialize)]
struct AuthError {
    error: AuthErrorDetails,
}

#[derive(Debug, Serialize)]
struct AuthErrorDetails {
    code: String,
    message: String,
}

impl AuthError {
    fn new(code: &str, message: &str) -> Self {
        Self {
            error: AuthErrorDetails {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }

    fn from_jwt(err: &JwtError) -> Self {
        match err {
            JwtError::TokenExpired => Self::new("TOKEN_EXPIRED", "Token has expired"),
            _ => Self::new("INVALID_TOKEN", "Invalid token"),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = if self.error.code == "FORBIDDEN" {
            StatusCode::FORBIDDEN
        } else {
            StatusCode::UNAUTHORIZED
        };
        (status, Json(self)).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    AuthError::new(
                        "MISSING_TOKEN",
                        "Authorization header with Bearer token required",
                    )
                    .into_response()
                })?;

        let auth_service = Arc::<AuthService>::from_ref(state);
        let actor = auth_service.authenticate(bearer.token()).map_err(|e| {
            tracing::debug!(error = %e, "Rejected bearer token");
            AuthError::from_jwt(&e).into_response()
        })?;

        Ok(AuthenticatedUser(actor))
    }
}

/// Requires the partner role
pub struct PartnerUser(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for PartnerUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthenticatedUser(actor) = AuthenticatedUser::from_request_parts(parts, state).await?;

        if actor.role != Role::Partner {
            return Err(AuthError::new("FORBIDDEN", "Partner access required").into_response());
        }

        Ok(PartnerUser(actor))
    }
}

/// Requires the customer role
pub struct CustomerUser(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for CustomerUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthenticatedUser(actor) = AuthenticatedUser::from_request_parts(parts, state).await?;

        if actor.role != Role::Customer {
            return Err(AuthError::new("FORBIDDEN", "Customer access required").into_response());
        }

        Ok(CustomerUser(actor))
    }
}
