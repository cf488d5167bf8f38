//! Payment endpoints

use axum::{
    extract::{Path, State},
    Json,
};

use super::{AuthenticatedUser, PartnerUser};
use crate::booking::Booking;
use crate::error::ApiResult;
use crate::models::ApiResponse;
use crate::payment::{
    CollectPaymentRequest, PaymentFailedRequest, PaymentSplit, VerifyPaymentRequest,
};
use crate::state::AppState;
use validator::Validate;

/// GET /api/bookings/:id/payment
pub async fn get_payment_split(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<PaymentSplit>>> {
    let split = state.payment_ledger.get_split(&id, &actor).await?;
    Ok(Json(ApiResponse::ok(split)))
}

/// POST /api/bookings/:id/payment/collect
pub async fn collect_payment(
    State(state): State<AppState>,
    PartnerUser(actor): PartnerUser,
    Path(id): Path<String>,
    Json(request): Json<CollectPaymentRequest>,
) -> ApiResult<Json<ApiResponse<PaymentSplit>>> {
    request.validate()?;
    let split = state
        .payment_ledger
        .collect_payment(&id, &actor, &request)
        .await?;
    Ok(Json(ApiResponse::ok(split)))
}

/// POST /api/payments/verify
pub async fn verify_payment(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Json(request): Json<VerifyPaymentRequest>,
) -> ApiResult<Json<ApiResponse<PaymentSplit>>> {
    request.validate()?;
    let split = state
        .payment_ledger
        .verify_online_payment(&actor, &request)
        .await?;
    Ok(Json(ApiResponse::ok(split)))
}

/// POST /api/payments/failed
pub async fn payment_failed(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Json(request): Json<PaymentFailedRequest>,
) -> ApiResult<Json<ApiResponse<Booking>>> {
    let booking = state.booking_service.fail_payment(&actor, request).await?;
    Ok(Json(ApiResponse::ok(booking)))
}
