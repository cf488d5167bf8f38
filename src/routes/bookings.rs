//! Booking route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::booking::*;
use crate::handlers::payment::{collect_payment, get_payment_split};
use crate::state::AppState;

pub fn booking_routes() -> Router<AppState> {
    Router::new()
        .route("/api/bookings", post(create_booking).get(list_bookings))
        .route("/api/bookings/verify-otp", post(verify_otp))
        .route("/api/bookings/:id", get(get_booking))
        .route("/api/bookings/:id/confirm", post(confirm_booking))
        .route("/api/bookings/:id/start", post(start_travel))
        .route("/api/bookings/:id/arrived", post(mark_arrived))
        .route("/api/bookings/:id/start-service", post(start_service))
        .route("/api/bookings/:id/complete", post(complete_service))
        .route("/api/bookings/:id/location", post(update_location))
        .route("/api/bookings/:id/cancel", post(cancel_booking))
        .route("/api/bookings/:id/payment", get(get_payment_split))
        .route("/api/bookings/:id/payment/collect", post(collect_payment))
}
