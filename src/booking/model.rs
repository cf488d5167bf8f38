//! Booking models and request DTOs

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{Actor, GeoPoint, Role};

/// Booking aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String, // Human readable id, e.g. MWG00042
    pub sequence: i64,
    pub customer_id: Uuid,
    pub partner_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub vehicle_id: Uuid,
    pub services: Vec<ServiceLine>,
    pub location: ServiceLocation,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: String, // HH:MM in the configured local offset
    pub scheduled_at: DateTime<Utc>,
    pub estimated_completion: DateTime<Utc>,
    pub status: BookingStatus,
    /// Four digit code; `None` once consumed
    pub otp: Option<String>,
    pub pricing: Pricing,
    pub payment_type: PaymentType,
    pub payment_mode: PaymentMode,
    pub live_location: Option<LiveLocation>,
    pub cancellation: Option<Cancellation>,
    pub otp_verified_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn pincode(&self) -> &str {
        &self.location.pincode
    }

    pub fn is_assigned_to(&self, partner_id: Uuid) -> bool {
        self.partner_id == Some(partner_id)
    }

    /// Owner, assigned partner, or a privileged role
    pub fn is_visible_to(&self, actor: &Actor) -> bool {
        match actor.role {
            Role::Customer => self.customer_id == actor.id,
            Role::Partner => self.is_assigned_to(actor.id),
            Role::Admin | Role::Franchise => true,
        }
    }

    /// Comma separated service names, used in offers and push bodies
    pub fn service_names(&self) -> String {
        self.services
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Copy of the booking as a partner may see it (the OTP stays with the customer)
    pub fn without_otp(mut self) -> Self {
        self.otp = None;
        self
    }
}

/// Booking lifecycle status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "booking_status", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Enroute,
    Arrived,
    InProgress,
    Completed,
    Cancelled,
    Expired,
    Failed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Enroute => "enroute",
            BookingStatus::Arrived => "arrived",
            BookingStatus::InProgress => "in-progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Expired => "expired",
            BookingStatus::Failed => "failed",
        }
    }

    /// Terminal bookings never change status again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed
                | BookingStatus::Cancelled
                | BookingStatus::Expired
                | BookingStatus::Failed
        )
    }

    /// Statuses in which an assigned partner is out on the job
    pub fn is_active_job(&self) -> bool {
        matches!(
            self,
            BookingStatus::Confirmed
                | BookingStatus::Enroute
                | BookingStatus::Arrived
                | BookingStatus::InProgress
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "enroute" => Ok(BookingStatus::Enroute),
            "arrived" => Ok(BookingStatus::Arrived),
            "in-progress" => Ok(BookingStatus::InProgress),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "expired" => Ok(BookingStatus::Expired),
            "failed" => Ok(BookingStatus::Failed),
            other => Err(format!("Unknown booking status '{}'", other)),
        }
    }
}

/// Snapshot of a catalog service at booking time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceLine {
    pub service_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub tax: i64,
    pub charges: i64,
    pub discount: i64,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceLocation {
    pub address: String,
    pub pincode: String,
    pub coordinates: Option<GeoPoint>,
    pub label: Option<String>,
}

/// Derived money fields. `total == subtotal + tax + charges - discount`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pricing {
    pub subtotal: i64,
    pub tax: i64,
    pub charges: i64,
    pub discount: i64,
    pub total: i64,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_type")]
pub enum PaymentType {
    #[serde(rename = "pay after service")]
    #[sqlx(rename = "pay after service")]
    PayAfterService,
    #[serde(rename = "pay online")]
    #[sqlx(rename = "pay online")]
    PayOnline,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_mode", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMode {
    Online,
    Cash,
}

/// Last reported partner position for a booking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cancellation {
    pub cancelled_by: Role,
    pub actor_id: Uuid,
    pub reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

/// Proof of an online payment made before the booking is placed
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OnlinePaymentProof {
    #[validate(length(min = 1))]
    pub order_id: String,
    #[validate(length(min = 1))]
    pub payment_id: String,
    #[validate(length(min = 1))]
    pub signature: String,
}

/// Request DTO for creating a booking
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBookingRequest {
    #[validate(length(min = 1, message = "At least one service is required"))]
    pub service_ids: Vec<Uuid>,
    pub vehicle_id: Uuid,
    /// YYYY-MM-DD
    #[validate(length(min = 1, message = "Date is required"))]
    pub date: String,
    /// HH:MM
    #[validate(length(min = 1, message = "Time is required"))]
    pub time: String,
    /// A saved delivery address of the customer
    pub delivery_address_id: Option<Uuid>,
    /// A freeform address; must carry a 6 digit pincode
    pub address: Option<String>,
    pub location: Option<GeoPoint>,
    pub label: Option<String>,
    pub payment_type: PaymentType,
    pub payment_mode: PaymentMode,
    pub coupon_code: Option<String>,
    #[validate]
    pub payment: Option<OnlinePaymentProof>,
}

/// Query parameters for listing bookings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListBookingsQuery {
    pub status: Option<BookingStatus>,
    pub customer_id: Option<Uuid>,
    pub partner_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Storage level filter, after role scoping has been applied
#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    pub customer_id: Option<Uuid>,
    pub partner_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub offset: i64,
    pub limit: i64,
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking) -> bool {
        self.status.map_or(true, |s| booking.status == s)
            && self.customer_id.map_or(true, |c| booking.customer_id == c)
            && self
                .partner_id
                .map_or(true, |p| booking.partner_id == Some(p))
            && self
                .branch_id
                .map_or(true, |b| booking.branch_id == Some(b))
    }
}

#[derive(Debug, Serialize)]
pub struct BookingPage {
    pub bookings: Vec<Booking>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyOtpRequest {
    #[serde(alias = "bookingId")]
    #[validate(length(min = 1))]
    pub booking_id: String,
    #[validate(length(equal = 4, message = "OTP must be 4 digits"))]
    pub otp: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfirmBookingRequest {
    /// Target partner for admin or franchise assignment
    pub partner_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StartServiceRequest {
    pub otp: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelBookingRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LocationUpdateRequest {
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&BookingStatus::InProgress).unwrap(),
            "\"in-progress\""
        );
        assert_eq!(
            "in-progress".parse::<BookingStatus>().unwrap(),
            BookingStatus::InProgress
        );
        assert!("done".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(BookingStatus::Completed.is_terminal());
        assert!(BookingStatus::Expired.is_terminal());
        assert!(!BookingStatus::Arrived.is_terminal());
        assert!(!BookingStatus::Pending.is_active_job());
    }

    #[test]
    fn test_payment_type_wire_names() {
        let parsed: PaymentType = serde_json::from_str("\"pay after service\"").unwrap();
        assert_eq!(parsed, PaymentType::PayAfterService);
        assert_eq!(
            serde_json::to_string(&PaymentType::PayOnline).unwrap(),
            "\"pay online\""
        );
    }
}
