use axum::{routing::put, Router};

use crate::handlers::profile::update_profile;
use crate::state::AppState;

pub fn profile_routes() -> Router<AppState> {
    Router::new().route("/api/profile", put(update_profile))
}
