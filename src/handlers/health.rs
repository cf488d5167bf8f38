//! Liveness and readiness

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::db::check_health;
use crate::state::AppState;

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database = match &state.db_pool {
        Some(pool) => match check_health(pool).await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::error!(error = %e, "Database health check failed");
                "unavailable"
            }
        },
        None => "memory",
    };
    let healthy = database != "unavailable";

    let body = json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
        "online_partners": state.dispatch.registry().online_count().await,
        "live_offers": state.dispatch.offers().len(),
        "realtime_clients": state.hub.connected_count().await,
    });

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// GET /
pub async fn root() -> &'static str {
    "Car wash booking API"
}
