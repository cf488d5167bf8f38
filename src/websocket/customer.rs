//! Customer channel: follow a booking's progress

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde_json::Value;

use super::{
    authenticate, payload, run_session, BookingRef, ControlFrame, SessionContext, SessionHandler,
    WsAuthQuery,
};
use crate::error::ApiError;
use crate::models::Role;
use crate::state::AppState;

/// `GET /ws/customer`
pub async fn customer_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsAuthQuery>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Response {
    let actor = match authenticate(&state, bearer, &query) {
        Ok(actor) => actor,
        Err(rejection) => return rejection,
    };
    if actor.role != Role::Customer {
        return ApiError::Unauthorized("Customer token required".to_string()).into_response();
    }

    ws.on_upgrade(move |socket| async move {
        run_session(socket, state, actor, CustomerSession).await;
    })
}

struct CustomerSession;

#[axum::async_trait]
impl SessionHandler for CustomerSession {
    async fn on_message(&mut self, ctx: &SessionContext, event: &str, data: Value) {
        let result = match event {
            "joinBooking" => join(ctx, data).await,
            "leaveBooking" => leave(ctx, data).await,
            "ping" => {
                ctx.control(ControlFrame::Pong).await;
                Ok(())
            }
            other => Err(ControlFrame::error(format!("Unknown event '{}'", other))),
        };

        if let Err(frame) = result {
            ctx.control(frame).await;
        }
    }
}

async fn join(ctx: &SessionContext, data: Value) -> Result<(), ControlFrame> {
    let BookingRef { booking_id } = payload(data)?;

    // Ownership check; a foreign booking reads as forbidden
    let booking = ctx
        .state
        .booking_service
        .get(&ctx.actor, &booking_id)
        .await
        .map_err(|e| ControlFrame::from(&e))?;

    ctx.state.hub.join_booking(ctx.connection_id, &booking.id).await;
    tracing::debug!(customer_id = %ctx.actor.id, booking_id = %booking.id, "Following booking");
    ctx.control(ControlFrame::Joined {
        booking_id: booking.id,
    })
    .await;
    Ok(())
}

async fn leave(ctx: &SessionContext, data: Value) -> Result<(), ControlFrame> {
    let BookingRef { booking_id } = payload(data)?;
    ctx.state.hub.leave_booking(ctx.connection_id, &booking_id).await;
    ctx.control(ControlFrame::Left { booking_id }).await;
    Ok(())
}
