//! Route definitions for the booking API

mod bookings;
mod coupons;
mod health;
mod payments;
mod profile;
mod ws;

pub use bookings::booking_routes;
pub use coupons::coupon_routes;
pub use health::health_routes;
pub use payments::payment_routes;
pub use profile::profile_routes;
pub use ws::ws_routes;
