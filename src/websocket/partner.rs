//! Partner channel: availability, offers and job updates

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

use super::{
    authenticate, payload, run_session, BookingRef, ControlFrame, SessionContext, SessionHandler,
    WsAuthQuery,
};
use crate::booking::{BookingStatus, LocationUpdateRequest};
use crate::dispatch::{AcceptOutcome, AvailabilityRecord};
use crate::error::ApiError;
use crate::models::{GeoPoint, Role};
use crate::notify::RealtimeEvent;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoOnline {
    #[serde(default)]
    pincodes: Option<Vec<String>>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusUpdate {
    #[serde(alias = "booking_id")]
    booking_id: String,
    status: BookingStatus,
    otp: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationUpdate {
    #[serde(alias = "booking_id")]
    booking_id: String,
    latitude: f64,
    longitude: f64,
}

/// `GET /ws/partner`
pub async fn partner_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsAuthQuery>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Response {
    let actor = match authenticate(&state, bearer, &query) {
        Ok(actor) => actor,
        Err(rejection) => return rejection,
    };
    if actor.role != Role::Partner {
        return ApiError::Unauthorized("Partner token required".to_string()).into_response();
    }
    match state.store.find_partner(actor.id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return ApiError::Unauthorized("Unknown partner".to_string()).into_response();
        }
        Err(e) => return e.into_response(),
    }

    ws.on_upgrade(move |socket| async move {
        let registry = state.dispatch.registry().clone();
        let connection_id = run_session(socket, state, actor, PartnerSession).await;
        if registry.drop_connection(actor.id, connection_id).await {
            tracing::info!(partner_id = %actor.id, "Partner offline after disconnect");
        }
    })
}

struct PartnerSession;

#[axum::async_trait]
impl SessionHandler for PartnerSession {
    async fn on_message(&mut self, ctx: &SessionContext, event: &str, data: Value) {
        let result = match event {
            "goOnline" => go_online(ctx, data).await,
            "goOffline" => go_offline(ctx).await,
            "acceptBooking" => accept(ctx, data).await,
            "declineBooking" => decline(ctx, data).await,
            "updateBookingStatus" => update_status(ctx, data).await,
            "updateLocation" => update_location(ctx, data).await,
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

async fn go_online(ctx: &SessionContext, data: Value) -> Result<(), ControlFrame> {
    let request: GoOnline = payload(data)?;
    let partner = ctx
        .state
        .store
        .find_partner(ctx.actor.id)
        .await
        .map_err(|e| ControlFrame::from(&e))?
        .ok_or_else(|| ControlFrame::error("Unknown partner"))?;

    if partner.status != crate::models::PartnerStatus::Approved || !partner.active {
        return Err(ControlFrame::error("Partner is not approved for jobs"));
    }

    // Requested pincodes are narrowed to the ones on the partner's profile
    let served: HashSet<String> = partner.pincodes.iter().cloned().collect();
    let pincodes: Vec<String> = match request.pincodes {
        Some(requested) => requested
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| served.contains(p))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect(),
        None => served.into_iter().collect(),
    };
    if pincodes.is_empty() {
        return Err(ControlFrame::error("No serviceable pincodes"));
    }

    let location = match (request.latitude, request.longitude) {
        (Some(latitude), Some(longitude)) => Some(GeoPoint {
            latitude,
            longitude,
        }),
        _ => None,
    };

    let mut sorted = pincodes.clone();
    sorted.sort();
    ctx.state
        .dispatch
        .registry()
        .mark_online(AvailabilityRecord::new(
            ctx.actor.id,
            ctx.connection_id,
            pincodes,
            location,
        ))
        .await;

    tracing::info!(partner_id = %ctx.actor.id, pincodes = ?sorted, "Partner online");
    ctx.control(ControlFrame::Online { pincodes: sorted }).await;
    Ok(())
}

async fn go_offline(ctx: &SessionContext) -> Result<(), ControlFrame> {
    ctx.state.dispatch.registry().mark_offline(ctx.actor.id).await;
    tracing::info!(partner_id = %ctx.actor.id, "Partner offline");
    ctx.control(ControlFrame::Offline).await;
    Ok(())
}

async fn accept(ctx: &SessionContext, data: Value) -> Result<(), ControlFrame> {
    let BookingRef { booking_id } = payload(data)?;

    match ctx
        .state
        .dispatch
        .accept(&booking_id, ctx.actor.id)
        .await
        .map_err(|e| ControlFrame::from(&e))?
    {
        AcceptOutcome::Accepted(booking) => {
            ctx.state.hub.join_booking(ctx.connection_id, &booking.id).await;
            ctx.event(RealtimeEvent::BookingAccepted {
                booking_id: booking.id.clone(),
                partner_id: ctx.actor.id,
                message: "Booking accepted".to_string(),
            })
            .await;
            ctx.event(RealtimeEvent::status_update(&booking)).await;
            Ok(())
        }
        AcceptOutcome::Lost => Err(ControlFrame::error(
            "Booking was already accepted by another partner",
        )),
        AcceptOutcome::NoOffer => Err(ControlFrame::error("No open offer for this booking")),
    }
}

async fn decline(ctx: &SessionContext, data: Value) -> Result<(), ControlFrame> {
    let BookingRef { booking_id } = payload(data)?;
    ctx.state.dispatch.decline(&booking_id, ctx.actor.id);
    Ok(())
}

async fn update_status(ctx: &SessionContext, data: Value) -> Result<(), ControlFrame> {
    let request: StatusUpdate = payload(data)?;
    let following = ctx
        .state
        .hub
        .is_following(ctx.connection_id, &request.booking_id)
        .await;

    let booking = ctx
        .state
        .booking_service
        .update_status(
            &ctx.actor,
            &request.booking_id,
            request.status,
            request.otp.as_deref(),
        )
        .await
        .map_err(|e| ControlFrame::from(&e))?;

    // The broadcast copy only reaches connections that already followed the booking
    if !following {
        ctx.state.hub.join_booking(ctx.connection_id, &booking.id).await;
        ctx.event(RealtimeEvent::status_update(&booking)).await;
    }
    Ok(())
}

async fn update_location(ctx: &SessionContext, data: Value) -> Result<(), ControlFrame> {
    let request: LocationUpdate = payload(data)?;
    ctx.state
        .booking_service
        .update_live_location(
            &ctx.actor,
            &request.booking_id,
            LocationUpdateRequest {
                latitude: request.latitude,
                longitude: request.longitude,
            },
        )
        .await
        .map_err(|e| ControlFrame::from(&e))?;
    Ok(())
}
