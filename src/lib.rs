//! Car wash marketplace backend
//!
//! REST and realtime API for customers booking doorstep washes and the
//! partners who serve them.

pub mod auth;
pub mod booking;
pub mod config;
pub mod coupon;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod payment;
pub mod profile;
pub mod routes;
pub mod state;
pub mod store;
pub mod websocket;

use axum::http::{HeaderValue, Method};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use crate::middleware::RateLimiter;
use crate::state::AppState;

/// Build the full router with middleware
pub fn create_router(state: AppState, rate_limiter: RateLimiter) -> Router {
    let cors = configure_cors(state.config.cors_allowed_origins.as_deref());

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::booking_routes())
        .merge(routes::payment_routes())
        .merge(routes::coupon_routes())
        .merge(routes::profile_routes())
        .merge(routes::ws_routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(cors)
                .layer(axum::middleware::from_fn(middleware::rate_limit_layer(
                    rate_limiter,
                )))
                .layer(axum::middleware::from_fn(middleware::request_tracing)),
        )
}

fn configure_cors(allowed_origins: Option<&str>) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .unwrap_or_default()
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    if origins.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins");
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}
