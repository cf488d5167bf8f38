//! Realtime events and the bus they travel on

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::booking::{lifecycle::status_message, Booking, BookingStatus};

/// Offer pushed to every eligible partner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewBookingOffer {
    pub booking_id: String,
    pub address: String,
    pub pincode: String,
    pub service: String,
    pub total: i64,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: String,
}

impl From<&Booking> for NewBookingOffer {
    fn from(booking: &Booking) -> Self {
        Self {
            booking_id: booking.id.clone(),
            address: booking.location.address.clone(),
            pincode: booking.location.pincode.clone(),
            service: booking.service_names(),
            total: booking.pricing.total,
            scheduled_date: booking.scheduled_date,
            scheduled_time: booking.scheduled_time.clone(),
        }
    }
}

/// Events sent over websocket connections as `{"event": ..., "data": ...}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum RealtimeEvent {
    NewBooking(NewBookingOffer),
    #[serde(rename_all = "camelCase")]
    BookingCancelled { booking_id: String },
    #[serde(rename_all = "camelCase")]
    BookingAccepted {
        booking_id: String,
        partner_id: Uuid,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    BookingConfirmed {
        booking_id: String,
        partner_id: Option<Uuid>,
    },
    #[serde(rename_all = "camelCase")]
    BookingStatusUpdate {
        booking_id: String,
        status: BookingStatus,
        message: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    BookingExpired { booking_id: String },
    #[serde(rename_all = "camelCase")]
    LiveTracking {
        booking_id: String,
        latitude: f64,
        longitude: f64,
        updated_at: DateTime<Utc>,
    },
}

impl RealtimeEvent {
    pub fn status_update(booking: &Booking) -> Self {
        RealtimeEvent::BookingStatusUpdate {
            booking_id: booking.id.clone(),
            status: booking.status,
            message: status_message(booking.status),
            timestamp: booking.updated_at,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RealtimeEvent::NewBooking(_) => "newBooking",
            RealtimeEvent::BookingCancelled { .. } => "bookingCancelled",
            RealtimeEvent::BookingAccepted { .. } => "bookingAccepted",
            RealtimeEvent::BookingConfirmed { .. } => "bookingConfirmed",
            RealtimeEvent::BookingStatusUpdate { .. } => "bookingStatusUpdate",
            RealtimeEvent::BookingExpired { .. } => "bookingExpired",
            RealtimeEvent::LiveTracking { .. } => "liveTracking",
        }
    }
}

/// Who an event is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Audience {
    /// A single partner's live connection
    Partner(Uuid),
    /// Everyone following a booking: the customer and the assigned partner
    Booking(String),
}

/// Outbound realtime delivery. Emitting never blocks and never fails the caller.
pub trait EventBus: Send + Sync {
    fn emit(&self, audience: Audience, event: RealtimeEvent);

    fn emit_to_partner(&self, partner_id: Uuid, event: RealtimeEvent) {
        self.emit(Audience::Partner(partner_id), event);
    }

    fn emit_to_booking(&self, booking_id: &str, event: RealtimeEvent) {
        self.emit(Audience::Booking(booking_id.to_string()), event);
    }

    /// `bookingStatusUpdate` for the booking's current status
    fn emit_status(&self, booking: &Booking) {
        self.emit_to_booking(&booking.id, RealtimeEvent::status_update(booking));
    }
}

/// Bus for contexts without realtime clients
pub struct NoopEventBus;

impl EventBus for NoopEventBus {
    fn emit(&self, audience: Audience, event: RealtimeEvent) {
        tracing::trace!(?audience, event = event.name(), "Dropping realtime event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let event = RealtimeEvent::BookingCancelled {
            booking_id: "MWG00001".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "bookingCancelled");
        assert_eq!(json["data"]["bookingId"], "MWG00001");
    }

    #[test]
    fn test_status_update_wire_shape() {
        let event = RealtimeEvent::BookingStatusUpdate {
            booking_id: "MWG00002".to_string(),
            status: BookingStatus::InProgress,
            message: "Service has started".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "bookingStatusUpdate");
        assert_eq!(json["data"]["status"], "in-progress");
        assert_eq!(event.name(), "bookingStatusUpdate");
    }
}
