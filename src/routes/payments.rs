//! Payment route definitions

use axum::{routing::post, Router};

use crate::handlers::payment::{payment_failed, verify_payment};
use crate::state::AppState;

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/api/payments/verify", post(verify_payment))
        .route("/api/payments/failed", post(payment_failed))
}
