use axum::{routing::post, Router};

use crate::handlers::coupon::apply_coupon;
use crate::state::AppState;

pub fn coupon_routes() -> Router<AppState> {
    Router::new().route("/api/coupons/apply", post(apply_coupon))
}
