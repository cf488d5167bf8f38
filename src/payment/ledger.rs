//! Payment ledger: adds money to a booking's split and settles the booking

use std::sync::Arc;

use crate::booking::{Booking, BookingStatus};
use crate::error::{ApiError, ApiResult};
use crate::models::{Actor, Role};
use crate::notify::{booking_data, push_to_customer, EventBus, PushSender};
use crate::payment::{
    CollectPaymentRequest, PaymentDelta, PaymentGateway, PaymentSplit, VerifyPaymentRequest,
};
use crate::store::{PaymentApplied, Store};

pub struct PaymentLedger {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    events: Arc<dyn EventBus>,
    push: Arc<dyn PushSender>,
}

impl PaymentLedger {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        events: Arc<dyn EventBus>,
        push: Arc<dyn PushSender>,
    ) -> Self {
        Self {
            store,
            gateway,
            events,
            push,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn PaymentGateway> {
        &self.gateway
    }

    pub async fn record_online_payment(
        &self,
        booking_id: &str,
        amount: i64,
        transaction_ref: &str,
    ) -> ApiResult<PaymentSplit> {
        self.apply(booking_id, PaymentDelta::online(amount, transaction_ref))
            .await
    }

    pub async fn record_cash_collection(
        &self,
        booking_id: &str,
        amount: i64,
        partner_id: uuid::Uuid,
    ) -> ApiResult<PaymentSplit> {
        self.apply(booking_id, PaymentDelta::cash(amount, partner_id))
            .await
    }

    /// Partner collects what is still due on an in-progress job
    pub async fn collect_payment(
        &self,
        booking_id: &str,
        actor: &Actor,
        request: &CollectPaymentRequest,
    ) -> ApiResult<PaymentSplit> {
        let booking = self.load_booking(booking_id).await?;
        if actor.role != Role::Partner || !booking.is_assigned_to(actor.id) {
            return Err(ApiError::forbidden(
                "Only the assigned partner can collect payment",
            ));
        }
        if booking.status != BookingStatus::InProgress {
            return Err(ApiError::InvalidTransition {
                from: booking.status,
                action: "collect payment",
            });
        }

        let split = self.load_split(&booking).await?;
        let delta = request.to_delta(&split, actor.id)?;
        self.apply(booking_id, delta).await
    }

    /// Verify a gateway checkout signature and record the online amount
    pub async fn verify_online_payment(
        &self,
        actor: &Actor,
        request: &VerifyPaymentRequest,
    ) -> ApiResult<PaymentSplit> {
        let booking = self.load_booking(&request.booking_id).await?;
        if !(actor.is_privileged() || booking.customer_id == actor.id) {
            return Err(ApiError::forbidden("Not allowed to pay for this booking"));
        }

        if !self
            .gateway
            .verify_signature(&request.order_id, &request.payment_id, &request.signature)
        {
            tracing::warn!(
                booking_id = %booking.id,
                order_id = %request.order_id,
                "Payment signature mismatch"
            );
            return Err(ApiError::validation("Invalid payment signature"));
        }

        if let Some(recorded) = self.store.find_online_payment(&request.payment_id).await? {
            recorded.ensure_belongs_to(&booking.id)?;
            tracing::info!(
                booking_id = %booking.id,
                payment_id = %request.payment_id,
                "Payment already recorded"
            );
            return self.load_split(&booking).await;
        }

        // The signature does not cover an amount; a checkout settles the balance
        let split = self.load_split(&booking).await?;
        let amount = split.remaining();
        if amount == 0 {
            return Err(ApiError::Conflict("Booking is already fully paid".to_string()));
        }
        if let Some(claimed) = request.amount.filter(|claimed| *claimed != amount) {
            return Err(ApiError::validation(format!(
                "Payment amount {} does not match the outstanding balance {}",
                claimed, amount
            )));
        }

        self.record_online_payment(&booking.id, amount, &request.payment_id)
            .await
    }

    pub async fn get_split(&self, booking_id: &str, actor: &Actor) -> ApiResult<PaymentSplit> {
        let booking = self.load_booking(booking_id).await?;
        if !booking.is_visible_to(actor) {
            return Err(ApiError::forbidden("Not allowed to view this booking"));
        }
        self.load_split(&booking).await
    }

    async fn apply(&self, booking_id: &str, delta: PaymentDelta) -> ApiResult<PaymentSplit> {
        delta.validate()?;

        let PaymentApplied {
            split,
            completed_booking,
            replayed,
        } = self.store.apply_payment(booking_id, delta.clone()).await?;

        if replayed {
            tracing::info!(
                booking_id = %booking_id,
                transaction_ref = ?delta.transaction_ref,
                "Payment already recorded"
            );
            return Ok(split);
        }

        tracing::info!(
            booking_id = %booking_id,
            online = delta.online,
            cash = delta.cash,
            paid = split.paid(),
            total = split.total,
            status = ?split.status,
            "Payment recorded"
        );

        if let Some(booking) = completed_booking {
            self.announce_completed(&booking);
        }
        Ok(split)
    }

    fn announce_completed(&self, booking: &Booking) {
        self.events.emit_status(booking);
        push_to_customer(
            &self.store,
            &self.push,
            booking.customer_id,
            "Service completed",
            format!("Your booking {} is complete. Thank you!", booking.id),
            booking_data("booking_completed", &booking.id),
        );
        tracing::info!(booking_id = %booking.id, "Booking settled and completed");
    }

    async fn load_booking(&self, booking_id: &str) -> ApiResult<Booking> {
        self.store
            .find_booking(booking_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Booking {}", booking_id)))
    }

    async fn load_split(&self, booking: &Booking) -> ApiResult<PaymentSplit> {
        Ok(self
            .store
            .find_split(&booking.id)
            .await?
            .unwrap_or_else(|| {
                PaymentSplit::new(booking.id.clone(), booking.pricing.total, booking.created_at)
            }))
    }
}
