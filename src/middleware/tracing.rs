//! Request tracing middleware

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use super::rate_limiter::extract_client_ip;

/// Log every request with its outcome and timing, inside a span carrying a request id
pub async fn request_tracing(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client_ip = extract_client_ip(&request);
    let request_id = Uuid::new_v4();

    let span = tracing::info_span!("http", %request_id, %method, %path);
    let start = Instant::now();

    async move {
        tracing::debug!(client_ip = %client_ip, "Request started");

        let response = next.run(request).await;
        let status = response.status().as_u16();
        let duration_ms = start.elapsed().as_millis() as u64;

        if response.status().is_server_error() {
            tracing::error!(status, duration_ms, client_ip = %client_ip, "Request failed");
        } else if response.status().is_client_error() {
            tracing::warn!(status, duration_ms, client_ip = %client_ip, "Request rejected");
        } else {
            tracing::info!(status, duration_ms, "Request completed");
        }

        response
    }
    .instrument(span)
    .await
}
