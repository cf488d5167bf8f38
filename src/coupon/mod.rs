//! Coupons: discount rules and per-user redemption limits

mod model;
mod service;

pub use model::*;
pub use service::CouponService;
