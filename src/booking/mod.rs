//! Bookings: the aggregate, its derived fields, the state machine and the service

pub mod lifecycle;
mod model;
mod pricing;
mod service;

pub use model::*;
pub use pricing::{
    estimated_completion, extract_pincode, format_booking_id, generate_otp, is_valid_pincode,
    scheduled_instant,
};
pub use service::{BookingService, BookingSettings};
