//! Persistence boundary
//!
//! Services talk to storage only through these traits. Two implementations
//! exist: [`PgStore`] for production and [`MemoryStore`] for development and
//! tests. Both apply every booking status change together with its partner
//! side effects as one atomic step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::booking::{Booking, BookingFilter, BookingStatus, Cancellation, LiveLocation};
use crate::coupon::Coupon;
use crate::error::ApiResult;
use crate::models::{Admin, CatalogService, Customer, Partner};
use crate::payment::{OnlinePayment, PaymentDelta, PaymentSplit};
use crate::profile::ProfileChanges;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// What happens to partner availability alongside a booking change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartnerEffect {
    None,
    /// Assign the booking to the partner and mark the partner busy.
    /// Fails with [`TransitionOutcome::PartnerBusy`] if the partner is not available.
    Claim(Uuid),
    /// Free the assigned partner, but only while its current booking is this one
    Release,
}

/// A conditional update of one booking
#[derive(Debug, Clone)]
pub struct BookingChange {
    /// The change only applies while the booking is in one of these statuses
    pub expected: &'static [BookingStatus],
    /// New status; `None` keeps the current one
    pub status: Option<BookingStatus>,
    pub consume_otp: bool,
    pub live_location: Option<LiveLocation>,
    pub cancellation: Option<Cancellation>,
    pub partner: PartnerEffect,
    pub at: DateTime<Utc>,
}

impl BookingChange {
    pub fn to_status(expected: &'static [BookingStatus], status: BookingStatus) -> Self {
        Self {
            expected,
            status: Some(status),
            consume_otp: false,
            live_location: None,
            cancellation: None,
            partner: PartnerEffect::None,
            at: Utc::now(),
        }
    }

    pub fn with_partner(mut self, effect: PartnerEffect) -> Self {
        self.partner = effect;
        self
    }

    pub fn consuming_otp(mut self) -> Self {
        self.consume_otp = true;
        self
    }

    /// Apply the non-partner parts of the change to a booking already known to match
    pub fn apply_to(&self, booking: &mut Booking) {
        if let Some(status) = self.status {
            booking.status = status;
            match status {
                BookingStatus::InProgress => booking.started_at = Some(self.at),
                BookingStatus::Completed => booking.completed_at = Some(self.at),
                _ => {}
            }
        }
        if self.consume_otp {
            booking.otp = None;
            booking.otp_verified_at = Some(self.at);
        }
        if let Some(location) = &self.live_location {
            booking.live_location = Some(location.clone());
        }
        if let Some(cancellation) = &self.cancellation {
            booking.cancellation = Some(cancellation.clone());
        }
        booking.updated_at = self.at;
    }
}

/// Result of a conditional booking update
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Applied(Booking),
    /// The booking was in a status the change does not accept
    StatusMismatch(BookingStatus),
    NotFound,
    PartnerBusy,
    PartnerNotFound,
}

/// Result of adding money to a booking's split
#[derive(Debug, Clone)]
pub struct PaymentApplied {
    pub split: PaymentSplit,
    /// Set when the payment settled an in-progress booking
    pub completed_booking: Option<Booking>,
    /// The transaction reference was already recorded; the split is unchanged
    pub replayed: bool,
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Atomically increment and return the shared booking counter
    async fn next_booking_sequence(&self) -> ApiResult<i64>;

    /// Persist a new booking together with its payment split and the online
    /// payment that prepaid it, if any
    async fn insert_booking(&self, booking: &Booking, split: &PaymentSplit) -> ApiResult<()>;

    async fn find_booking(&self, id: &str) -> ApiResult<Option<Booking>>;

    /// Page of bookings matching the filter, newest first, and the total match count
    async fn list_bookings(&self, filter: &BookingFilter) -> ApiResult<(Vec<Booking>, i64)>;

    async fn transition_booking(
        &self,
        id: &str,
        change: BookingChange,
    ) -> ApiResult<TransitionOutcome>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn find_split(&self, booking_id: &str) -> ApiResult<Option<PaymentSplit>>;

    async fn find_online_payment(&self, transaction_ref: &str)
        -> ApiResult<Option<OnlinePayment>>;

    /// Upsert the split, add the delta and settle the booking when fully paid.
    /// Cash in the delta is added to the collecting partner's counters.
    /// Online money carrying a reference that is already recorded for this
    /// booking leaves the split unchanged.
    async fn apply_payment(&self, booking_id: &str, delta: PaymentDelta)
        -> ApiResult<PaymentApplied>;
}

#[async_trait]
pub trait PartnerRepository: Send + Sync {
    async fn find_partner(&self, id: Uuid) -> ApiResult<Option<Partner>>;

    /// Approved, active, available partners with a push token serving the pincode
    async fn push_targets_for_pincode(&self, pincode: &str) -> ApiResult<Vec<Partner>>;

    async fn update_partner_profile(
        &self,
        id: Uuid,
        changes: &ProfileChanges,
    ) -> ApiResult<Option<Partner>>;
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn find_customer(&self, id: Uuid) -> ApiResult<Option<Customer>>;

    async fn update_customer_profile(
        &self,
        id: Uuid,
        changes: &ProfileChanges,
    ) -> ApiResult<Option<Customer>>;
}

#[async_trait]
pub trait AdminRepository: Send + Sync {
    async fn find_admin(&self, id: Uuid) -> ApiResult<Option<Admin>>;

    async fn update_admin_profile(
        &self,
        id: Uuid,
        changes: &ProfileChanges,
    ) -> ApiResult<Option<Admin>>;
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Services with the given ids; missing ids are simply absent
    async fn find_services(&self, ids: &[Uuid]) -> ApiResult<Vec<CatalogService>>;
}

#[async_trait]
pub trait CouponRepository: Send + Sync {
    async fn find_coupon_by_code(&self, code: &str) -> ApiResult<Option<Coupon>>;

    async fn coupon_usage(&self, coupon_id: Uuid, user_id: Uuid) -> ApiResult<i32>;

    /// Increment the user's usage if it is still below `limit`; false otherwise
    async fn redeem_coupon(&self, coupon_id: Uuid, user_id: Uuid, limit: i32) -> ApiResult<bool>;

    /// Undo one redemption
    async fn release_coupon(&self, coupon_id: Uuid, user_id: Uuid) -> ApiResult<()>;
}

/// Everything the services need from storage
pub trait Store:
    BookingRepository
    + PaymentRepository
    + PartnerRepository
    + CustomerRepository
    + AdminRepository
    + CatalogRepository
    + CouponRepository
{
}

impl<T> Store for T where
    T: BookingRepository
        + PaymentRepository
        + PartnerRepository
        + CustomerRepository
        + AdminRepository
        + CatalogRepository
        + CouponRepository
{
}
