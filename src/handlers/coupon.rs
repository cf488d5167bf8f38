//! Coupon preview endpoint

use axum::{extract::State, Json};
use validator::Validate;

use super::CustomerUser;
use crate::coupon::{ApplyCouponRequest, CouponQuote};
use crate::error::ApiResult;
use crate::models::ApiResponse;
use crate::state::AppState;

/// POST /api/coupons/apply
pub async fn apply_coupon(
    State(state): State<AppState>,
    CustomerUser(actor): CustomerUser,
    Json(request): Json<ApplyCouponRequest>,
) -> ApiResult<Json<ApiResponse<CouponQuote>>> {
    request.validate()?;
    let quote = state
        .coupon_service
        .quote(
            &request.code,
            request.price,
            request.pincode.as_deref(),
            actor.id,
        )
        .await?;
    Ok(Json(ApiResponse::ok(quote)))
}
