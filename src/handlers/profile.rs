//! Profile endpoint

use axum::{extract::State, Json};

use super::AuthenticatedUser;
use crate::error::ApiResult;
use crate::models::ApiResponse;
use crate::profile::{Profile, ProfileChanges};
use crate::state::AppState;

/// PUT /api/profile
pub async fn update_profile(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Json(changes): Json<ProfileChanges>,
) -> ApiResult<Json<ApiResponse<Profile>>> {
    let profile = state.profile_service.update(&actor, changes).await?;
    Ok(Json(ApiResponse::ok(profile)))
}
