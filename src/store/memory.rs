//! In-memory store
//!
//! A single async mutex guards all state, so every trait method is atomic.
//! Nothing survives a restart; used with `STORAGE_BACKEND=memory` and in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::booking::lifecycle::Transition;
use crate::booking::{Booking, BookingFilter, BookingStatus};
use crate::coupon::Coupon;
use crate::error::{ApiError, ApiResult};
use crate::models::{Admin, CatalogService, Customer, Partner};
use crate::payment::{OnlinePayment, PaymentDelta, PaymentSplit, SplitStatus};
use crate::profile::ProfileChanges;
use crate::store::{
    AdminRepository, BookingChange, BookingRepository, CatalogRepository, CouponRepository,
    CustomerRepository, PartnerEffect, PartnerRepository, PaymentApplied, PaymentRepository,
    TransitionOutcome,
};

#[derive(Default)]
struct MemoryState {
    bookings: HashMap<String, Booking>,
    splits: HashMap<String, PaymentSplit>,
    online_payments: HashMap<String, OnlinePayment>,
    partners: HashMap<Uuid, Partner>,
    customers: HashMap<Uuid, Customer>,
    admins: HashMap<Uuid, Admin>,
    services: HashMap<Uuid, CatalogService>,
    coupons: HashMap<Uuid, Coupon>,
    coupon_usage: HashMap<(Uuid, Uuid), i32>,
}

impl MemoryState {
    fn transition(&mut self, id: &str, change: &BookingChange) -> TransitionOutcome {
        let Some(mut booking) = self.bookings.get(id).cloned() else {
            return TransitionOutcome::NotFound;
        };
        if !change.expected.contains(&booking.status) {
            return TransitionOutcome::StatusMismatch(booking.status);
        }

        match change.partner {
            PartnerEffect::Claim(partner_id) => {
                let Some(partner) = self.partners.get_mut(&partner_id) else {
                    return TransitionOutcome::PartnerNotFound;
                };
                if !partner.is_available || partner.current_booking_id.is_some() {
                    return TransitionOutcome::PartnerBusy;
                }
                partner.is_available = false;
                partner.current_booking_id = Some(booking.id.clone());
                partner.updated_at = change.at;
                booking.partner_id = Some(partner_id);
                if let Some(branch) = partner.franchise_branch() {
                    booking.branch_id = Some(branch);
                }
            }
            PartnerEffect::Release => self.release_partner(&booking),
            PartnerEffect::None => {}
        }

        change.apply_to(&mut booking);
        self.bookings.insert(booking.id.clone(), booking.clone());
        TransitionOutcome::Applied(booking)
    }

    fn release_partner(&mut self, booking: &Booking) {
        let Some(partner_id) = booking.partner_id else {
            return;
        };
        if let Some(partner) = self.partners.get_mut(&partner_id) {
            if partner.current_booking_id.as_deref() == Some(booking.id.as_str()) {
                partner.is_available = true;
                partner.current_booking_id = None;
                partner.updated_at = Utc::now();
            }
        }
    }
}

fn patch(target: &mut String, value: &Option<String>) {
    if let Some(v) = value {
        *target = v.clone();
    }
}

fn patch_opt(target: &mut Option<String>, value: &Option<String>) {
    if let Some(v) = value {
        *target = Some(v.clone());
    }
}

pub struct MemoryStore {
    state: Mutex<MemoryState>,
    sequence: AtomicI64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            sequence: AtomicI64::new(0),
        }
    }

    pub async fn insert_partner(&self, partner: Partner) {
        self.state.lock().await.partners.insert(partner.id, partner);
    }

    pub async fn insert_customer(&self, customer: Customer) {
        self.state.lock().await.customers.insert(customer.id, customer);
    }

    pub async fn insert_admin(&self, admin: Admin) {
        self.state.lock().await.admins.insert(admin.id, admin);
    }

    pub async fn insert_service(&self, service: CatalogService) {
        self.state.lock().await.services.insert(service.id, service);
    }

    pub async fn insert_coupon(&self, coupon: Coupon) {
        self.state.lock().await.coupons.insert(coupon.id, coupon);
    }

    /// Overwrite a stored booking as-is
    pub async fn put_booking(&self, booking: Booking) {
        self.state
            .lock()
            .await
            .bookings
            .insert(booking.id.clone(), booking);
    }
}

#[async_trait]
impl BookingRepository for MemoryStore {
    async fn next_booking_sequence(&self) -> ApiResult<i64> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn insert_booking(&self, booking: &Booking, split: &PaymentSplit) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        if state.bookings.contains_key(&booking.id) {
            return Err(ApiError::Conflict(format!(
                "Booking {} already exists",
                booking.id
            )));
        }
        if let Some(reference) = &split.online_transaction_id {
            if let Some(recorded) = state.online_payments.get(reference) {
                recorded.ensure_belongs_to(&booking.id)?;
            }
            state.online_payments.insert(
                reference.clone(),
                OnlinePayment {
                    transaction_ref: reference.clone(),
                    booking_id: booking.id.clone(),
                    amount: split.online_amount,
                    recorded_at: split.updated_at,
                },
            );
        }
        state.bookings.insert(booking.id.clone(), booking.clone());
        state.splits.insert(split.booking_id.clone(), split.clone());
        Ok(())
    }

    async fn find_booking(&self, id: &str) -> ApiResult<Option<Booking>> {
        Ok(self.state.lock().await.bookings.get(id).cloned())
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> ApiResult<(Vec<Booking>, i64)> {
        let state = self.state.lock().await;
        let mut matching: Vec<&Booking> =
            state.bookings.values().filter(|b| filter.matches(b)).collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.sequence.cmp(&a.sequence))
        });

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn transition_booking(
        &self,
        id: &str,
        change: BookingChange,
    ) -> ApiResult<TransitionOutcome> {
        Ok(self.state.lock().await.transition(id, &change))
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn find_split(&self, booking_id: &str) -> ApiResult<Option<PaymentSplit>> {
        Ok(self.state.lock().await.splits.get(booking_id).cloned())
    }

    async fn find_online_payment(
        &self,
        transaction_ref: &str,
    ) -> ApiResult<Option<OnlinePayment>> {
        Ok(self
            .state
            .lock()
            .await
            .online_payments
            .get(transaction_ref)
            .cloned())
    }

    async fn apply_payment(
        &self,
        booking_id: &str,
        delta: PaymentDelta,
    ) -> ApiResult<PaymentApplied> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let booking = state
            .bookings
            .get(booking_id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("Booking {}", booking_id)))?;

        let mut split = state
            .splits
            .get(booking_id)
            .cloned()
            .unwrap_or_else(|| PaymentSplit::new(booking_id, booking.pricing.total, now));

        let reference = delta.transaction_ref.clone().filter(|_| delta.online > 0);
        if let Some(recorded) = reference.as_ref().and_then(|r| state.online_payments.get(r)) {
            recorded.ensure_belongs_to(booking_id)?;
            return Ok(PaymentApplied {
                split,
                completed_booking: None,
                replayed: true,
            });
        }

        split.apply(&delta, now)?;
        if let Some(reference) = reference {
            state.online_payments.insert(
                reference.clone(),
                OnlinePayment {
                    transaction_ref: reference,
                    booking_id: booking_id.to_string(),
                    amount: delta.online,
                    recorded_at: now,
                },
            );
        }

        if delta.cash > 0 {
            if let Some(partner) = delta
                .collected_by
                .and_then(|id| state.partners.get_mut(&id))
            {
                partner.current_cash_in_hand += delta.cash;
                partner.all_time_cash_collected += delta.cash;
                partner.updated_at = now;
            }
        }

        let mut completed_booking = None;
        if split.status == SplitStatus::Completed && booking.status == BookingStatus::InProgress {
            let change = BookingChange {
                at: now,
                ..Transition::Complete.change()
            };
            if let TransitionOutcome::Applied(done) = state.transition(booking_id, &change) {
                completed_booking = Some(done);
            }
        }

        state.splits.insert(booking_id.to_string(), split.clone());
        Ok(PaymentApplied {
            split,
            completed_booking,
            replayed: false,
        })
    }
}

#[async_trait]
impl PartnerRepository for MemoryStore {
    async fn find_partner(&self, id: Uuid) -> ApiResult<Option<Partner>> {
        Ok(self.state.lock().await.partners.get(&id).cloned())
    }

    async fn push_targets_for_pincode(&self, pincode: &str) -> ApiResult<Vec<Partner>> {
        Ok(self
            .state
            .lock()
            .await
            .partners
            .values()
            .filter(|p| {
                p.can_take_jobs()
                    && p.pincodes.iter().any(|c| c == pincode)
                    && p.push_token.as_deref().is_some_and(|t| !t.is_empty())
            })
            .cloned()
            .collect())
    }

    async fn update_partner_profile(
        &self,
        id: Uuid,
        changes: &ProfileChanges,
    ) -> ApiResult<Option<Partner>> {
        let mut state = self.state.lock().await;
        let Some(partner) = state.partners.get_mut(&id) else {
            return Ok(None);
        };
        patch(&mut partner.name, &changes.name);
        patch(&mut partner.phone, &changes.phone);
        patch_opt(&mut partner.email, &changes.email);
        patch_opt(&mut partner.push_token, &changes.push_token);
        partner.updated_at = Utc::now();
        Ok(Some(partner.clone()))
    }
}

#[async_trait]
impl CustomerRepository for MemoryStore {
    async fn find_customer(&self, id: Uuid) -> ApiResult<Option<Customer>> {
        Ok(self.state.lock().await.customers.get(&id).cloned())
    }

    async fn update_customer_profile(
        &self,
        id: Uuid,
        changes: &ProfileChanges,
    ) -> ApiResult<Option<Customer>> {
        let mut state = self.state.lock().await;
        let Some(customer) = state.customers.get_mut(&id) else {
            return Ok(None);
        };
        patch(&mut customer.name, &changes.name);
        patch(&mut customer.phone, &changes.phone);
        patch_opt(&mut customer.email, &changes.email);
        patch_opt(&mut customer.push_token, &changes.push_token);
        customer.updated_at = Utc::now();
        Ok(Some(customer.clone()))
    }
}

#[async_trait]
impl AdminRepository for MemoryStore {
    async fn find_admin(&self, id: Uuid) -> ApiResult<Option<Admin>> {
        Ok(self.state.lock().await.admins.get(&id).cloned())
    }

    async fn update_admin_profile(
        &self,
        id: Uuid,
        changes: &ProfileChanges,
    ) -> ApiResult<Option<Admin>> {
        let mut state = self.state.lock().await;
        let Some(admin) = state.admins.get_mut(&id) else {
            return Ok(None);
        };
        patch(&mut admin.name, &changes.name);
        patch_opt(&mut admin.phone, &changes.phone);
        patch(&mut admin.email, &changes.email);
        patch_opt(&mut admin.push_token, &changes.push_token);
        admin.updated_at = Utc::now();
        Ok(Some(admin.clone()))
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn find_services(&self, ids: &[Uuid]) -> ApiResult<Vec<CatalogService>> {
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.services.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl CouponRepository for MemoryStore {
    async fn find_coupon_by_code(&self, code: &str) -> ApiResult<Option<Coupon>> {
        Ok(self
            .state
            .lock()
            .await
            .coupons
            .values()
            .find(|c| c.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn coupon_usage(&self, coupon_id: Uuid, user_id: Uuid) -> ApiResult<i32> {
        Ok(self
            .state
            .lock()
            .await
            .coupon_usage
            .get(&(coupon_id, user_id))
            .copied()
            .unwrap_or(0))
    }

    async fn redeem_coupon(&self, coupon_id: Uuid, user_id: Uuid, limit: i32) -> ApiResult<bool> {
        let mut state = self.state.lock().await;
        let used = state.coupon_usage.entry((coupon_id, user_id)).or_insert(0);
        if *used >= limit {
            return Ok(false);
        }
        *used += 1;
        Ok(true)
    }

    async fn release_coupon(&self, coupon_id: Uuid, user_id: Uuid) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        if let Some(used) = state.coupon_usage.get_mut(&(coupon_id, user_id)) {
            *used = (*used - 1).max(0);
        }
        Ok(())
    }
}
