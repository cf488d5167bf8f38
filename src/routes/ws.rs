//! Realtime channels

use axum::{routing::get, Router};

use crate::state::AppState;
use crate::websocket::{customer_ws_handler, partner_ws_handler};

pub fn ws_routes() -> Router<AppState> {
    Router::new()
        .route("/ws/partner", get(partner_ws_handler))
        .route("/ws/customer", get(customer_ws_handler))
}
