//! HTTP middleware: request tracing, rate limiting and authentication

pub mod auth;
mod rate_limiter;
mod tracing;

pub use auth::{AuthenticatedUser, CustomerUser, PartnerUser};
pub use rate_limiter::{rate_limit_layer, RateLimiter};
pub use tracing::request_tracing;
