//! Booking endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use super::AuthenticatedUser;
use crate::booking::{
    Booking, BookingPage, CancelBookingRequest, ConfirmBookingRequest, CreateBookingRequest,
    ListBookingsQuery, LocationUpdateRequest, StartServiceRequest, VerifyOtpRequest,
};
use crate::error::ApiResult;
use crate::models::ApiResponse;
use crate::state::AppState;

type BookingResponse = ApiResult<Json<ApiResponse<Booking>>>;

/// POST /api/bookings
pub async fn create_booking(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Json(request): Json<CreateBookingRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Booking>>)> {
    let booking = state.booking_service.create(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(booking))))
}

/// GET /api/bookings
pub async fn list_bookings(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Query(query): Query<ListBookingsQuery>,
) -> ApiResult<Json<ApiResponse<BookingPage>>> {
    let page = state.booking_service.list(&actor, query).await?;
    Ok(Json(ApiResponse::ok(page)))
}

/// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(id): Path<String>,
) -> BookingResponse {
    let booking = state.booking_service.get(&actor, &id).await?;
    Ok(Json(ApiResponse::ok(booking)))
}

/// POST /api/bookings/verify-otp
pub async fn verify_otp(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Json(request): Json<VerifyOtpRequest>,
) -> BookingResponse {
    let booking = state.booking_service.verify_otp(&actor, request).await?;
    Ok(Json(ApiResponse::ok(booking)))
}

/// POST /api/bookings/:id/confirm
pub async fn confirm_booking(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(id): Path<String>,
    body: Option<Json<ConfirmBookingRequest>>,
) -> BookingResponse {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let booking = state.booking_service.confirm(&actor, &id, request).await?;
    Ok(Json(ApiResponse::ok(booking)))
}

/// POST /api/bookings/:id/start
pub async fn start_travel(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(id): Path<String>,
) -> BookingResponse {
    let booking = state.booking_service.start_travel(&actor, &id).await?;
    Ok(Json(ApiResponse::ok(booking)))
}

/// POST /api/bookings/:id/arrived
pub async fn mark_arrived(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(id): Path<String>,
) -> BookingResponse {
    let booking = state.booking_service.mark_arrived(&actor, &id).await?;
    Ok(Json(ApiResponse::ok(booking)))
}

/// POST /api/bookings/:id/start-service
pub async fn start_service(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(id): Path<String>,
    body: Option<Json<StartServiceRequest>>,
) -> BookingResponse {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let booking = state
        .booking_service
        .start_service(&actor, &id, request.otp.as_deref())
        .await?;
    Ok(Json(ApiResponse::ok(booking)))
}

/// POST /api/bookings/:id/complete
pub async fn complete_service(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(id): Path<String>,
) -> BookingResponse {
    let booking = state.booking_service.complete_service(&actor, &id).await?;
    Ok(Json(ApiResponse::ok(booking)))
}

/// POST /api/bookings/:id/location
pub async fn update_location(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(id): Path<String>,
    Json(request): Json<LocationUpdateRequest>,
) -> BookingResponse {
    let booking = state
        .booking_service
        .update_live_location(&actor, &id, request)
        .await?;
    Ok(Json(ApiResponse::ok(booking)))
}

/// POST /api/bookings/:id/cancel
pub async fn cancel_booking(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(id): Path<String>,
    body: Option<Json<CancelBookingRequest>>,
) -> BookingResponse {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let booking = state.booking_service.cancel(&actor, &id, request).await?;
    Ok(Json(ApiResponse::ok(booking)))
}
