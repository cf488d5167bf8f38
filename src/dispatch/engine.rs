//! Dispatch engine: broadcast offers, resolve the accept race, expire offers

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::booking::{lifecycle::Transition, Booking};
use crate::dispatch::{AvailabilityRecord, BookingOffer, ClaimOutcome, OfferStore, PartnerRegistry};
use crate::error::{ApiError, ApiResult};
use crate::notify::{booking_data, push_to_customer, EventBus, NewBookingOffer, PushSender, RealtimeEvent};
use crate::store::{PartnerEffect, Store, TransitionOutcome};

/// How an accept attempt ended
#[derive(Debug, Clone)]
pub enum AcceptOutcome {
    /// This partner won; the booking is confirmed and assigned to them
    Accepted(Booking),
    /// Someone else won, or the booking moved on
    Lost,
    /// No live offer for this partner (late, declined or never offered)
    NoOffer,
}

pub struct DispatchEngine {
    store: Arc<dyn Store>,
    registry: Arc<dyn PartnerRegistry>,
    offers: Arc<dyn OfferStore>,
    events: Arc<dyn EventBus>,
    push: Arc<dyn PushSender>,
    offer_timeout: Duration,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<dyn PartnerRegistry>,
        offers: Arc<dyn OfferStore>,
        events: Arc<dyn EventBus>,
        push: Arc<dyn PushSender>,
        offer_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            offers,
            events,
            push,
            offer_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<dyn PartnerRegistry> {
        &self.registry
    }

    pub fn offers(&self) -> &Arc<dyn OfferStore> {
        &self.offers
    }

    /// Offer a pending booking to every online partner serving its pincode.
    /// Returns how many partners received the offer.
    pub async fn offer(self: &Arc<Self>, booking: &Booking) -> usize {
        let eligible: Vec<AvailabilityRecord> = self.registry.find_eligible(booking.pincode()).await;

        if eligible.is_empty() {
            tracing::info!(
                booking_id = %booking.id,
                pincode = %booking.pincode(),
                "No online partners for pincode, booking stays pending"
            );
            return 0;
        }

        let partner_ids: Vec<Uuid> = eligible.iter().map(|r| r.partner_id).collect();
        let offer = BookingOffer::new(
            booking.id.clone(),
            partner_ids.iter().copied(),
            Instant::now() + self.offer_timeout,
        );
        if let Some(mut previous) = self.offers.insert(offer) {
            previous.cancel_timer();
        }

        let engine = Arc::clone(self);
        let booking_id = booking.id.clone();
        let timeout = self.offer_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            engine.expire(&booking_id).await;
        });
        self.offers.set_timer(&booking.id, timer.abort_handle());

        let payload = NewBookingOffer::from(booking);
        for partner_id in &partner_ids {
            self.events
                .emit_to_partner(*partner_id, RealtimeEvent::NewBooking(payload.clone()));
        }

        tracing::info!(
            booking_id = %booking.id,
            partners = partner_ids.len(),
            timeout_secs = self.offer_timeout.as_secs(),
            "Booking offered"
        );
        partner_ids.len()
    }

    /// Expire an offer nobody accepted. No-op when the offer was accepted or removed.
    pub async fn expire(&self, booking_id: &str) {
        let Some(offer) = self.offers.take_unaccepted(booking_id) else {
            tracing::debug!(booking_id = %booking_id, "Offer already resolved, skipping expiry");
            return;
        };

        let change = Transition::Expire.change();
        match self.store.transition_booking(booking_id, change).await {
            Ok(TransitionOutcome::Applied(booking)) => {
                let expired = RealtimeEvent::BookingExpired {
                    booking_id: booking.id.clone(),
                };
                self.events.emit_to_booking(&booking.id, expired.clone());
                self.events.emit_status(&booking);
                for partner_id in &offer.offered_to {
                    self.events.emit_to_partner(*partner_id, expired.clone());
                }
                push_to_customer(
                    &self.store,
                    &self.push,
                    booking.customer_id,
                    "Booking expired",
                    "No partner accepted your booking in time",
                    booking_data("booking_expired", &booking.id),
                );
                tracing::info!(booking_id = %booking.id, "Booking expired without acceptance");
            }
            Ok(outcome) => {
                tracing::debug!(booking_id = %booking_id, ?outcome, "Expiry skipped");
            }
            Err(e) => {
                tracing::error!(booking_id = %booking_id, error = %e, "Failed to expire booking");
            }
        }
    }

    /// First offered partner to accept wins the booking
    pub async fn accept(&self, booking_id: &str, partner_id: Uuid) -> ApiResult<AcceptOutcome> {
        match self.offers.claim(booking_id, partner_id) {
            ClaimOutcome::Won => {}
            ClaimOutcome::AlreadyAccepted => {
                tracing::info!(booking_id = %booking_id, partner_id = %partner_id, "Accept lost the race");
                return Ok(AcceptOutcome::Lost);
            }
            ClaimOutcome::NotOffered | ClaimOutcome::NoOffer => {
                tracing::info!(booking_id = %booking_id, partner_id = %partner_id, "Accept without a live offer ignored");
                return Ok(AcceptOutcome::NoOffer);
            }
        }

        let change = Transition::Confirm.change().with_partner(PartnerEffect::Claim(partner_id));

        let outcome = match self.store.transition_booking(booking_id, change).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.reopen(booking_id, partner_id).await;
                return Err(e);
            }
        };

        match outcome {
            TransitionOutcome::Applied(booking) => {
                let others = match self.offers.remove(booking_id) {
                    Some(mut offer) => {
                        offer.cancel_timer();
                        offer.others()
                    }
                    None => Vec::new(),
                };
                self.announce_confirmed(&booking, partner_id, &others);
                tracing::info!(booking_id = %booking.id, partner_id = %partner_id, "Booking accepted");
                Ok(AcceptOutcome::Accepted(booking))
            }
            TransitionOutcome::PartnerBusy => {
                self.reopen(booking_id, partner_id).await;
                Err(ApiError::Conflict(
                    "Partner already has an active booking".to_string(),
                ))
            }
            TransitionOutcome::PartnerNotFound => {
                self.reopen(booking_id, partner_id).await;
                Err(ApiError::not_found(format!("Partner {}", partner_id)))
            }
            TransitionOutcome::StatusMismatch(status) => {
                self.withdraw(booking_id);
                tracing::info!(booking_id = %booking_id, status = %status, "Booking no longer pending, offer dropped");
                Ok(AcceptOutcome::Lost)
            }
            TransitionOutcome::NotFound => {
                self.withdraw(booking_id);
                Err(ApiError::not_found(format!("Booking {}", booking_id)))
            }
        }
    }

    /// Drop the partner from a live offer
    pub fn decline(&self, booking_id: &str, partner_id: Uuid) -> bool {
        let declined = self.offers.decline(booking_id, partner_id);
        tracing::info!(booking_id = %booking_id, partner_id = %partner_id, declined, "Offer declined");
        declined
    }

    /// Confirm a pending booking for a partner outside the offer race
    pub async fn assign(&self, booking_id: &str, partner_id: Uuid) -> ApiResult<Booking> {
        self.assign_with(booking_id, partner_id, false).await
    }

    /// Manual confirmation by a partner holding the booking's OTP; the OTP is consumed
    pub async fn assign_verified(&self, booking_id: &str, partner_id: Uuid) -> ApiResult<Booking> {
        self.assign_with(booking_id, partner_id, true).await
    }

    async fn assign_with(
        &self,
        booking_id: &str,
        partner_id: Uuid,
        consume_otp: bool,
    ) -> ApiResult<Booking> {
        let mut change =
            Transition::Confirm.change().with_partner(PartnerEffect::Claim(partner_id));
        if consume_otp {
            change = change.consuming_otp();
        }

        match self.store.transition_booking(booking_id, change).await? {
            TransitionOutcome::Applied(booking) => {
                let others = match self.offers.remove(booking_id) {
                    Some(mut offer) => {
                        offer.cancel_timer();
                        offer
                            .offered_to
                            .iter()
                            .filter(|p| **p != partner_id)
                            .copied()
                            .collect()
                    }
                    None => Vec::new(),
                };
                self.announce_confirmed(&booking, partner_id, &others);
                tracing::info!(booking_id = %booking.id, partner_id = %partner_id, "Booking assigned");
                Ok(booking)
            }
            TransitionOutcome::StatusMismatch(status) => Err(Transition::Confirm.rejected(status)),
            TransitionOutcome::PartnerBusy => Err(ApiError::Conflict(
                "Partner already has an active booking".to_string(),
            )),
            TransitionOutcome::PartnerNotFound => {
                Err(ApiError::not_found(format!("Partner {}", partner_id)))
            }
            TransitionOutcome::NotFound => Err(ApiError::not_found(format!("Booking {}", booking_id))),
        }
    }

    /// Remove a live offer and tell every offered partner it is gone
    pub fn withdraw(&self, booking_id: &str) -> bool {
        let Some(mut offer) = self.offers.remove(booking_id) else {
            return false;
        };
        offer.cancel_timer();
        for partner_id in &offer.offered_to {
            self.events.emit_to_partner(
                *partner_id,
                RealtimeEvent::BookingCancelled {
                    booking_id: booking_id.to_string(),
                },
            );
        }
        tracing::info!(booking_id = %booking_id, partners = offer.offered_to.len(), "Offer withdrawn");
        true
    }

    async fn reopen(&self, booking_id: &str, partner_id: Uuid) {
        if let Some(deadline) = self.offers.reopen(booking_id, partner_id) {
            // The timer may have fired while the claim was in flight
            if Instant::now() >= deadline {
                self.expire(booking_id).await;
            }
        }
    }

    fn announce_confirmed(&self, booking: &Booking, partner_id: Uuid, others: &[Uuid]) {
        for other in others {
            self.events.emit_to_partner(
                *other,
                RealtimeEvent::BookingCancelled {
                    booking_id: booking.id.clone(),
                },
            );
        }
        self.events.emit_to_booking(
            &booking.id,
            RealtimeEvent::BookingAccepted {
                booking_id: booking.id.clone(),
                partner_id,
                message: "A partner has accepted your booking".to_string(),
            },
        );
        self.events.emit_to_booking(
            &booking.id,
            RealtimeEvent::BookingConfirmed {
                booking_id: booking.id.clone(),
                partner_id: Some(partner_id),
            },
        );
        self.events.emit_status(booking);

        push_to_customer(
            &self.store,
            &self.push,
            booking.customer_id,
            "Booking confirmed",
            format!("Your booking {} has been accepted", booking.id),
            booking_data("booking_confirmed", &booking.id),
        );
    }
}
