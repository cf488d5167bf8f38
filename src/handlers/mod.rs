//! HTTP handlers
//!
//! Handlers authenticate the caller, hand the request to a service and wrap
//! the result in [`ApiResponse`](crate::models::ApiResponse).

pub mod booking;
pub mod coupon;
pub mod health;
pub mod payment;
pub mod profile;

pub use crate::middleware::auth::{AuthenticatedUser, CustomerUser, PartnerUser};
