//! Booking service: creation, reads and every lifecycle operation
//!
//! Each status change is prechecked against the booking as loaded, then
//! applied through a conditional store update so a concurrent change can
//! never be overwritten. Notifications go out only after the update applied.

use std::sync::Arc;

use chrono::{FixedOffset, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::booking::lifecycle::{status_message, Transition, TRACKABLE};
use crate::booking::{
    estimated_completion, extract_pincode, format_booking_id, generate_otp, is_valid_pincode,
    scheduled_instant, Booking, BookingFilter, BookingPage, BookingStatus, Cancellation,
    CancelBookingRequest, ConfirmBookingRequest, CreateBookingRequest, ListBookingsQuery,
    LiveLocation, LocationUpdateRequest, PaymentType, Pricing, ServiceLine, ServiceLocation,
    VerifyOtpRequest,
};
use crate::config::Config;
use crate::coupon::CouponService;
use crate::dispatch::DispatchEngine;
use crate::error::{ApiError, ApiResult};
use crate::middleware::RateLimiter;
use crate::models::{Actor, Customer, Role};
use crate::notify::{
    booking_data, push_to_customer, spawn_push, EventBus, PushMessage, PushSender, RealtimeEvent,
};
use crate::payment::{PaymentDelta, PaymentFailedRequest, PaymentGateway, PaymentSplit, SplitStatus};
use crate::store::{BookingChange, PartnerEffect, Store, TransitionOutcome};

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;

/// Tunables taken from [`Config`]
#[derive(Debug, Clone)]
pub struct BookingSettings {
    pub id_prefix: String,
    pub cancellation_grace_minutes: i64,
    pub schedule_offset: FixedOffset,
    pub otp_attempts_per_minute: u32,
}

impl BookingSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            id_prefix: config.booking_id_prefix.clone(),
            cancellation_grace_minutes: config.cancellation_grace_minutes,
            schedule_offset: config.schedule_offset,
            otp_attempts_per_minute: config.otp_attempts_per_minute,
        }
    }
}

pub struct BookingService {
    store: Arc<dyn Store>,
    dispatch: Arc<DispatchEngine>,
    coupons: Arc<CouponService>,
    gateway: Arc<dyn PaymentGateway>,
    events: Arc<dyn EventBus>,
    push: Arc<dyn PushSender>,
    otp_limiter: RateLimiter,
    settings: BookingSettings,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn Store>,
        dispatch: Arc<DispatchEngine>,
        coupons: Arc<CouponService>,
        gateway: Arc<dyn PaymentGateway>,
        events: Arc<dyn EventBus>,
        push: Arc<dyn PushSender>,
        settings: BookingSettings,
    ) -> Self {
        Self {
            store,
            dispatch,
            coupons,
            gateway,
            events,
            push,
            otp_limiter: RateLimiter::per_minute(settings.otp_attempts_per_minute),
            settings,
        }
    }

    /// Create a booking for the calling customer and offer it to partners
    pub async fn create(&self, actor: &Actor, request: CreateBookingRequest) -> ApiResult<Booking> {
        if actor.role != Role::Customer {
            return Err(ApiError::forbidden("Only customers can create bookings"));
        }
        request.validate()?;

        let customer = self
            .store
            .find_customer(actor.id)
            .await?
            .ok_or_else(|| ApiError::not_found("Customer"))?;

        if !customer.vehicles.iter().any(|v| v.id == request.vehicle_id) {
            return Err(ApiError::validation(
                "Vehicle does not belong to the customer",
            ));
        }

        let location = resolve_location(&customer, &request)?;
        let (scheduled_date, scheduled_time, scheduled_at) = scheduled_instant(
            &request.date,
            &request.time,
            &self.settings.schedule_offset,
        )?;
        let lines = self.resolve_services(&request.service_ids).await?;
        let mut pricing = Pricing::from_lines(&lines);

        let online_payment = match (&request.payment, request.payment_type) {
            (Some(proof), PaymentType::PayOnline) => {
                if !self.gateway.verify_signature(
                    &proof.order_id,
                    &proof.payment_id,
                    &proof.signature,
                ) {
                    tracing::warn!(
                        customer_id = %actor.id,
                        order_id = %proof.order_id,
                        "Rejected booking with invalid payment signature"
                    );
                    return Err(ApiError::validation("Invalid payment signature"));
                }
                if self.store.find_online_payment(&proof.payment_id).await?.is_some() {
                    return Err(ApiError::Conflict(format!(
                        "Payment {} is already recorded for another booking",
                        proof.payment_id
                    )));
                }
                Some(proof.payment_id.clone())
            }
            (Some(_), PaymentType::PayAfterService) => {
                return Err(ApiError::validation(
                    "Payment details are only accepted for pay online bookings",
                ));
            }
            (None, _) => None,
        };

        let redemption = match request.coupon_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => {
                let redemption = self
                    .coupons
                    .redeem(code, pricing.subtotal, Some(&location.pincode), actor.id)
                    .await?;
                pricing.apply_coupon(&redemption.code, redemption.discount);
                Some(redemption)
            }
            _ => None,
        };

        match self
            .persist_new(
                actor.id,
                &request,
                lines,
                location,
                pricing,
                (scheduled_date, scheduled_time, scheduled_at),
                online_payment,
            )
            .await
        {
            Ok(booking) => {
                self.announce_created(&booking).await;
                Ok(booking)
            }
            Err(e) => {
                if let Some(redemption) = &redemption {
                    self.coupons.release(redemption).await;
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_new(
        &self,
        customer_id: Uuid,
        request: &CreateBookingRequest,
        services: Vec<ServiceLine>,
        location: ServiceLocation,
        pricing: Pricing,
        schedule: (chrono::NaiveDate, String, chrono::DateTime<Utc>),
        online_payment: Option<String>,
    ) -> ApiResult<Booking> {
        let (scheduled_date, scheduled_time, scheduled_at) = schedule;
        let sequence = self.store.next_booking_sequence().await?;
        let now = Utc::now();

        let booking = Booking {
            id: format_booking_id(&self.settings.id_prefix, sequence),
            sequence,
            customer_id,
            partner_id: None,
            branch_id: None,
            vehicle_id: request.vehicle_id,
            estimated_completion: estimated_completion(scheduled_at, &services),
            services,
            location,
            scheduled_date,
            scheduled_time,
            scheduled_at,
            status: BookingStatus::Pending,
            otp: Some(generate_otp()),
            pricing,
            payment_type: request.payment_type,
            payment_mode: request.payment_mode,
            live_location: None,
            cancellation: None,
            otp_verified_at: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut split = PaymentSplit::new(booking.id.clone(), booking.pricing.total, now);
        if let Some(payment_id) = online_payment {
            if booking.pricing.total > 0 {
                split.apply(&PaymentDelta::online(booking.pricing.total, payment_id), now)?;
            }
        }

        self.store.insert_booking(&booking, &split).await?;

        tracing::info!(
            booking_id = %booking.id,
            customer_id = %customer_id,
            pincode = %booking.pincode(),
            total = booking.pricing.total,
            split_status = ?split.status,
            "Booking created"
        );
        Ok(booking)
    }

    async fn resolve_services(&self, ids: &[Uuid]) -> ApiResult<Vec<ServiceLine>> {
        let catalog = self.store.find_services(ids).await?;
        ids.iter()
            .map(|id| {
                catalog
                    .iter()
                    .find(|s| s.id == *id && s.active)
                    .map(ServiceLine::snapshot)
                    .ok_or_else(|| ApiError::validation(format!("Service {} is not available", id)))
            })
            .collect()
    }

    async fn announce_created(&self, booking: &Booking) {
        let offered = self.dispatch.offer(booking).await;
        tracing::debug!(booking_id = %booking.id, offered, "Dispatch started");

        push_to_customer(
            &self.store,
            &self.push,
            booking.customer_id,
            "Booking placed",
            format!(
                "Your booking {} for {} is placed. We are finding a partner.",
                booking.id,
                booking.service_names()
            ),
            booking_data("booking_created", &booking.id),
        );

        let store = Arc::clone(&self.store);
        let push = Arc::clone(&self.push);
        let booking_id = booking.id.clone();
        let pincode = booking.pincode().to_string();
        let body = format!(
            "{} at {} on {} {}",
            booking.service_names(),
            booking.location.address,
            booking.scheduled_date,
            booking.scheduled_time
        );
        tokio::spawn(async move {
            match store.push_targets_for_pincode(&pincode).await {
                Ok(partners) => {
                    let tokens = partners.into_iter().filter_map(|p| p.push_token);
                    let message = PushMessage::new(
                        tokens,
                        "New booking nearby",
                        body,
                        booking_data("new_booking", &booking_id),
                    );
                    if !message.tokens.is_empty() {
                        push.send(message).await;
                    }
                }
                Err(e) => {
                    tracing::error!(booking_id = %booking_id, error = %e, "Partner push lookup failed")
                }
            }
        });
    }

    pub async fn get(&self, actor: &Actor, booking_id: &str) -> ApiResult<Booking> {
        let booking = self.load(booking_id).await?;
        if !booking.is_visible_to(actor) {
            return Err(ApiError::forbidden("Not allowed to view this booking"));
        }
        Ok(redact_for(actor, booking))
    }

    /// Role scoped, paginated listing, newest first
    pub async fn list(&self, actor: &Actor, query: ListBookingsQuery) -> ApiResult<BookingPage> {
        let page = query.page.unwrap_or(1);
        if page < 1 {
            return Err(ApiError::validation("page must be at least 1"));
        }
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(ApiError::validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        let mut filter = BookingFilter {
            status: query.status,
            offset: (page - 1) * limit,
            limit,
            ..Default::default()
        };
        match actor.role {
            Role::Customer => filter.customer_id = Some(actor.id),
            Role::Partner => filter.partner_id = Some(actor.id),
            Role::Admin | Role::Franchise => {
                filter.customer_id = query.customer_id;
                filter.partner_id = query.partner_id;
                filter.branch_id = query.branch_id;
            }
        }

        let (bookings, total) = self.store.list_bookings(&filter).await?;
        Ok(BookingPage {
            bookings: bookings.into_iter().map(|b| redact_for(actor, b)).collect(),
            total,
            page,
            limit,
        })
    }

    /// OTP confirmation of a pending booking. A partner caller becomes the
    /// assignee; a privileged caller confirms without assigning anyone.
    pub async fn verify_otp(&self, actor: &Actor, request: VerifyOtpRequest) -> ApiResult<Booking> {
        request.validate()?;
        if actor.role == Role::Customer {
            return Err(ApiError::forbidden("Customers cannot verify their own OTP"));
        }
        self.check_otp_budget(&request.booking_id).await?;

        let booking = self.load(&request.booking_id).await?;
        Transition::Confirm.check(booking.status)?;
        if booking.otp.as_deref() != Some(request.otp.as_str()) {
            tracing::warn!(booking_id = %booking.id, actor_id = %actor.id, "OTP mismatch");
            return Err(ApiError::validation("Invalid OTP"));
        }

        if actor.role == Role::Partner {
            self.ensure_partner_can_serve(actor.id, &booking).await?;
            let confirmed = self.dispatch.assign_verified(&booking.id, actor.id).await?;
            self.otp_limiter.forget(&booking.id).await;
            return Ok(confirmed.without_otp());
        }

        let change = Transition::Confirm.change().consuming_otp();
        let confirmed = self.apply(&booking.id, Transition::Confirm, change).await?;
        self.otp_limiter.forget(&confirmed.id).await;
        self.dispatch.withdraw(&confirmed.id);
        self.events.emit_to_booking(
            &confirmed.id,
            RealtimeEvent::BookingConfirmed {
                booking_id: confirmed.id.clone(),
                partner_id: None,
            },
        );
        self.announce_status(&confirmed);
        Ok(confirmed)
    }

    /// Partner self-confirmation, or admin/franchise assignment of `partner_id`
    pub async fn confirm(
        &self,
        actor: &Actor,
        booking_id: &str,
        request: ConfirmBookingRequest,
    ) -> ApiResult<Booking> {
        let partner_id = match actor.role {
            Role::Partner => match request.partner_id {
                Some(other) if other != actor.id => {
                    return Err(ApiError::forbidden(
                        "Partners can only confirm bookings for themselves",
                    ))
                }
                _ => actor.id,
            },
            Role::Admin | Role::Franchise => request
                .partner_id
                .ok_or_else(|| ApiError::validation("partner_id is required"))?,
            Role::Customer => {
                return Err(ApiError::forbidden("Customers cannot confirm bookings"))
            }
        };

        let booking = self.load(booking_id).await?;
        Transition::Confirm.check(booking.status)?;
        self.ensure_partner_can_serve(partner_id, &booking).await?;

        let confirmed = self.dispatch.assign(booking_id, partner_id).await?;
        Ok(redact_for(actor, confirmed))
    }

    pub async fn start_travel(&self, actor: &Actor, booking_id: &str) -> ApiResult<Booking> {
        let booking = self.load_assigned(actor, booking_id).await?;
        Transition::StartTravel.check(booking.status)?;

        let change = Transition::StartTravel.change();
        let booking = self.apply(booking_id, Transition::StartTravel, change).await?;
        self.announce_status(&booking);
        Ok(booking.without_otp())
    }

    pub async fn mark_arrived(&self, actor: &Actor, booking_id: &str) -> ApiResult<Booking> {
        let booking = self.load_assigned(actor, booking_id).await?;
        Transition::MarkArrived.check(booking.status)?;

        let change = Transition::MarkArrived.change();
        let booking = self.apply(booking_id, Transition::MarkArrived, change).await?;
        self.announce_status(&booking);
        Ok(booking.without_otp())
    }

    /// Arrived to in-progress once the customer's OTP checks out. If the OTP
    /// was already consumed by an earlier confirmation, none is needed.
    pub async fn start_service(
        &self,
        actor: &Actor,
        booking_id: &str,
        otp: Option<&str>,
    ) -> ApiResult<Booking> {
        let booking = self.load_assigned(actor, booking_id).await?;
        Transition::StartService.check(booking.status)?;

        let mut change = Transition::StartService.change();
        if let Some(expected) = booking.otp.as_deref() {
            let Some(given) = otp else {
                return Err(ApiError::validation("OTP is required to start the service"));
            };
            self.check_otp_budget(booking_id).await?;
            if given.trim() != expected {
                tracing::warn!(booking_id = %booking_id, partner_id = %actor.id, "OTP mismatch");
                return Err(ApiError::validation("Invalid OTP"));
            }
            change = change.consuming_otp();
        }

        let consumed = change.consume_otp;
        let booking = self.apply(booking_id, Transition::StartService, change).await?;
        if consumed {
            self.otp_limiter.forget(booking_id).await;
        }
        self.announce_status(&booking);
        Ok(booking)
    }

    /// Close an in-progress job whose split is already settled
    pub async fn complete_service(&self, actor: &Actor, booking_id: &str) -> ApiResult<Booking> {
        let booking = self.load(booking_id).await?;
        if !(actor.is_privileged()
            || (actor.role == Role::Partner && booking.is_assigned_to(actor.id)))
        {
            return Err(ApiError::forbidden(
                "Only the assigned partner can complete this booking",
            ));
        }
        Transition::Complete.check(booking.status)?;

        let settled = self
            .store
            .find_split(booking_id)
            .await?
            .is_some_and(|s| s.status == SplitStatus::Completed);
        if !settled {
            return Err(ApiError::Conflict(
                "Payment must be collected before completing the booking".to_string(),
            ));
        }

        let change = Transition::Complete.change();
        let booking = self.apply(booking_id, Transition::Complete, change).await?;
        self.announce_status(&booking);
        Ok(booking)
    }

    pub async fn update_live_location(
        &self,
        actor: &Actor,
        booking_id: &str,
        request: LocationUpdateRequest,
    ) -> ApiResult<Booking> {
        request.validate()?;
        let booking = self.load_assigned(actor, booking_id).await?;
        if !TRACKABLE.contains(&booking.status) {
            return Err(ApiError::InvalidTransition {
                from: booking.status,
                action: "update location",
            });
        }

        let now = Utc::now();
        let location = LiveLocation {
            latitude: request.latitude,
            longitude: request.longitude,
            updated_at: now,
        };
        let change = BookingChange {
            expected: TRACKABLE,
            status: None,
            consume_otp: false,
            live_location: Some(location.clone()),
            cancellation: None,
            partner: PartnerEffect::None,
            at: now,
        };

        let booking = match self.store.transition_booking(booking_id, change).await? {
            TransitionOutcome::Applied(booking) => booking,
            TransitionOutcome::StatusMismatch(status) => {
                return Err(ApiError::InvalidTransition {
                    from: status,
                    action: "update location",
                })
            }
            TransitionOutcome::NotFound => {
                return Err(ApiError::not_found(format!("Booking {}", booking_id)))
            }
            outcome => return Err(unexpected(booking_id, outcome)),
        };

        self.events.emit_to_booking(
            &booking.id,
            RealtimeEvent::LiveTracking {
                booking_id: booking.id.clone(),
                latitude: location.latitude,
                longitude: location.longitude,
                updated_at: location.updated_at,
            },
        );
        Ok(booking.without_otp())
    }

    /// Customers may cancel their own booking inside the grace window;
    /// admins and franchises may cancel any non-terminal booking.
    pub async fn cancel(
        &self,
        actor: &Actor,
        booking_id: &str,
        request: CancelBookingRequest,
    ) -> ApiResult<Booking> {
        request.validate()?;
        let booking = self.load(booking_id).await?;

        match actor.role {
            Role::Customer if booking.customer_id == actor.id => {}
            Role::Admin | Role::Franchise => {}
            _ => return Err(ApiError::forbidden("Not allowed to cancel this booking")),
        }
        Transition::Cancel.check(booking.status)?;

        let now = Utc::now();
        if actor.role == Role::Customer {
            let elapsed = now.signed_duration_since(booking.created_at);
            if elapsed > chrono::Duration::minutes(self.settings.cancellation_grace_minutes) {
                return Err(ApiError::CancellationWindowExpired(
                    self.settings.cancellation_grace_minutes,
                ));
            }
        }

        let change = BookingChange {
            cancellation: Some(Cancellation {
                cancelled_by: actor.role,
                actor_id: actor.id,
                reason: request.reason.clone(),
                cancelled_at: now,
            }),
            at: now,
            ..Transition::Cancel.change()
        };
        let cancelled = self.apply(booking_id, Transition::Cancel, change).await?;

        self.dispatch.withdraw(&cancelled.id);
        if let Some(partner_id) = cancelled.partner_id {
            self.events.emit_to_partner(
                partner_id,
                RealtimeEvent::BookingCancelled {
                    booking_id: cancelled.id.clone(),
                },
            );
            self.push_to_partner(
                partner_id,
                "Booking cancelled",
                format!("Booking {} has been cancelled", cancelled.id),
                booking_data("booking_cancelled", &cancelled.id),
            );
        }
        self.announce_status(&cancelled);

        tracing::info!(
            booking_id = %cancelled.id,
            cancelled_by = actor.role.as_str(),
            "Booking cancelled"
        );
        Ok(cancelled)
    }

    /// Online payment for a pending booking failed at the gateway
    pub async fn fail_payment(
        &self,
        actor: &Actor,
        request: PaymentFailedRequest,
    ) -> ApiResult<Booking> {
        request.validate()?;
        let booking = self.load(&request.booking_id).await?;
        if !(actor.is_privileged() || booking.customer_id == actor.id) {
            return Err(ApiError::forbidden("Not allowed to update this booking"));
        }
        Transition::FailPayment.check(booking.status)?;

        let change = Transition::FailPayment.change();
        let failed = self.apply(&booking.id, Transition::FailPayment, change).await?;
        self.dispatch.withdraw(&failed.id);
        self.announce_status(&failed);

        tracing::warn!(
            booking_id = %failed.id,
            reason = request.reason.as_deref().unwrap_or("unspecified"),
            "Booking payment failed"
        );
        Ok(failed)
    }

    /// Route a realtime `updateBookingStatus` onto the explicit operations
    pub async fn update_status(
        &self,
        actor: &Actor,
        booking_id: &str,
        status: BookingStatus,
        otp: Option<&str>,
    ) -> ApiResult<Booking> {
        match status {
            BookingStatus::Confirmed => {
                self.confirm(actor, booking_id, ConfirmBookingRequest::default())
                    .await
            }
            BookingStatus::Enroute => self.start_travel(actor, booking_id).await,
            BookingStatus::Arrived => self.mark_arrived(actor, booking_id).await,
            BookingStatus::InProgress => self.start_service(actor, booking_id, otp).await,
            BookingStatus::Completed => self.complete_service(actor, booking_id).await,
            BookingStatus::Cancelled => {
                self.cancel(actor, booking_id, CancelBookingRequest::default())
                    .await
            }
            other => Err(ApiError::validation(format!(
                "Status '{}' cannot be set directly",
                other
            ))),
        }
    }

    async fn load(&self, booking_id: &str) -> ApiResult<Booking> {
        self.store
            .find_booking(booking_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Booking {}", booking_id)))
    }

    /// Load a booking the calling partner is assigned to
    async fn load_assigned(&self, actor: &Actor, booking_id: &str) -> ApiResult<Booking> {
        let booking = self.load(booking_id).await?;
        if actor.role != Role::Partner || !booking.is_assigned_to(actor.id) {
            return Err(ApiError::forbidden(
                "Only the assigned partner can update this booking",
            ));
        }
        Ok(booking)
    }

    async fn ensure_partner_can_serve(&self, partner_id: Uuid, booking: &Booking) -> ApiResult<()> {
        let partner = self
            .store
            .find_partner(partner_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Partner {}", partner_id)))?;
        if partner.status != crate::models::PartnerStatus::Approved || !partner.active {
            return Err(ApiError::forbidden("Partner is not approved for jobs"));
        }
        if !partner.pincodes.iter().any(|p| p == booking.pincode()) {
            return Err(ApiError::forbidden(
                "Booking is outside the partner's service area",
            ));
        }
        Ok(())
    }

    /// Per booking OTP attempt buckets; idle ones are swept periodically
    pub fn otp_limiter(&self) -> &RateLimiter {
        &self.otp_limiter
    }

    async fn check_otp_budget(&self, booking_id: &str) -> ApiResult<()> {
        if self.otp_limiter.check(booking_id).await {
            Ok(())
        } else {
            tracing::warn!(booking_id = %booking_id, "OTP attempt budget exhausted");
            Err(ApiError::TooManyRequests)
        }
    }

    async fn apply(
        &self,
        booking_id: &str,
        transition: Transition,
        change: BookingChange,
    ) -> ApiResult<Booking> {
        match self.store.transition_booking(booking_id, change).await? {
            TransitionOutcome::Applied(booking) => {
                tracing::info!(
                    booking_id = %booking.id,
                    status = %booking.status,
                    action = transition.action(),
                    "Booking status changed"
                );
                Ok(booking)
            }
            TransitionOutcome::StatusMismatch(status) => Err(transition.rejected(status)),
            TransitionOutcome::NotFound => {
                Err(ApiError::not_found(format!("Booking {}", booking_id)))
            }
            outcome => Err(unexpected(booking_id, outcome)),
        }
    }

    fn announce_status(&self, booking: &Booking) {
        self.events.emit_status(booking);
        push_to_customer(
            &self.store,
            &self.push,
            booking.customer_id,
            format!("Booking {}", booking.id),
            status_message(booking.status),
            booking_data("booking_status", &booking.id),
        );
    }

    fn push_to_partner(
        &self,
        partner_id: Uuid,
        title: &str,
        body: String,
        data: serde_json::Value,
    ) {
        let store = Arc::clone(&self.store);
        let push = Arc::clone(&self.push);
        let title = title.to_string();
        tokio::spawn(async move {
            match store.find_partner(partner_id).await {
                Ok(Some(partner)) => {
                    let message = PushMessage::new(partner.push_token, title, body, data);
                    spawn_push(&push, message);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(partner_id = %partner_id, error = %e, "Partner push lookup failed")
                }
            }
        });
    }
}

/// Partners never see the customer's OTP
fn redact_for(actor: &Actor, booking: Booking) -> Booking {
    if actor.role == Role::Partner {
        booking.without_otp()
    } else {
        booking
    }
}

fn unexpected(booking_id: &str, outcome: TransitionOutcome) -> ApiError {
    tracing::error!(booking_id = %booking_id, ?outcome, "Unexpected transition outcome");
    ApiError::InternalError("Unexpected booking update outcome".to_string())
}

/// Either a saved address of the customer or a freeform address with a pincode
fn resolve_location(customer: &Customer, request: &CreateBookingRequest) -> ApiResult<ServiceLocation> {
    match (request.delivery_address_id, request.address.as_deref()) {
        (Some(_), Some(_)) => Err(ApiError::validation(
            "Provide either a saved delivery address or a new address, not both",
        )),
        (None, None) => Err(ApiError::validation("Delivery address is required")),
        (Some(address_id), None) => {
            let saved = customer
                .addresses
                .iter()
                .find(|a| a.id == address_id)
                .ok_or_else(|| ApiError::validation("Delivery address not found"))?;
            if !is_valid_pincode(&saved.postal_code) {
                return Err(ApiError::validation("Invalid pincode in address"));
            }
            Ok(ServiceLocation {
                address: saved.full_address(),
                pincode: saved.postal_code.clone(),
                coordinates: saved.coordinates,
                label: saved.label.clone().or_else(|| request.label.clone()),
            })
        }
        (None, Some(address)) => {
            let address = address.trim();
            if address.is_empty() {
                return Err(ApiError::validation("Delivery address is required"));
            }
            let coordinates = request
                .location
                .ok_or_else(|| ApiError::validation("Location is required with a new address"))?;
            let pincode = extract_pincode(address)
                .ok_or_else(|| ApiError::validation("Invalid pincode in address"))?;
            Ok(ServiceLocation {
                address: address.to_string(),
                pincode,
                coordinates: Some(coordinates),
                label: request.label.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::{PaymentMode, PaymentType};
    use crate::models::{DeliveryAddress, GeoPoint};

    fn customer_with_address(postal_code: &str) -> (Customer, Uuid) {
        let address_id = Uuid::new_v4();
        let customer = Customer {
            id: Uuid::new_v4(),
            name: "Asha".to_string(),
            phone: "9876543210".to_string(),
            email: None,
            push_token: None,
            vehicles: Vec::new(),
            addresses: vec![DeliveryAddress {
                id: address_id,
                label: Some("Home".to_string()),
                street: "12 MG Road".to_string(),
                city: "Bengaluru".to_string(),
                state: "KA".to_string(),
                postal_code: postal_code.to_string(),
                coordinates: None,
            }],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        (customer, address_id)
    }

    fn request() -> CreateBookingRequest {
        CreateBookingRequest {
            service_ids: vec![Uuid::new_v4()],
            vehicle_id: Uuid::new_v4(),
            date: "2026-11-02".to_string(),
            time: "09:30".to_string(),
            delivery_address_id: None,
            address: None,
            location: None,
            label: None,
            payment_type: PaymentType::PayAfterService,
            payment_mode: PaymentMode::Cash,
            coupon_code: None,
            payment: None,
        }
    }

    #[test]
    fn test_saved_address_resolution() {
        let (customer, address_id) = customer_with_address("560001");
        let req = CreateBookingRequest {
            delivery_address_id: Some(address_id),
            ..request()
        };
        let location = resolve_location(&customer, &req).unwrap();
        assert_eq!(location.address, "12 MG Road, Bengaluru, KA 560001");
        assert_eq!(location.pincode, "560001");
        assert_eq!(location.label.as_deref(), Some("Home"));
    }

    #[test]
    fn test_freeform_address_needs_pincode_and_location() {
        let (customer, _) = customer_with_address("560001");
        let point = GeoPoint {
            latitude: 12.97,
            longitude: 77.59,
        };

        let no_pincode = CreateBookingRequest {
            address: Some("Near the lake, Indiranagar".to_string()),
            location: Some(point),
            ..request()
        };
        assert!(matches!(
            resolve_location(&customer, &no_pincode),
            Err(ApiError::ValidationError(ref m)) if m == "Invalid pincode in address"
        ));

        let no_location = CreateBookingRequest {
            address: Some("Indiranagar, Bengaluru 560038".to_string()),
            ..request()
        };
        assert!(resolve_location(&customer, &no_location).is_err());

        let ok = CreateBookingRequest {
            address: Some("Indiranagar, Bengaluru 560038".to_string()),
            location: Some(point),
            ..request()
        };
        assert_eq!(resolve_location(&customer, &ok).unwrap().pincode, "560038");
    }

    #[test]
    fn test_address_sources_are_exclusive() {
        let (customer, address_id) = customer_with_address("560001");
        let both = CreateBookingRequest {
            delivery_address_id: Some(address_id),
            address: Some("Indiranagar 560038".to_string()),
            ..request()
        };
        assert!(resolve_location(&customer, &both).is_err());
        assert!(resolve_location(&customer, &request()).is_err());
    }
}
