//! Live booking offers and the accept check-and-set

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio::task::AbortHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// An offer broadcast for one pending booking
#[derive(Debug)]
pub struct BookingOffer {
    pub booking_id: String,
    pub offered_to: HashSet<Uuid>,
    /// Set by the first successful claim
    pub accepted_by: Option<Uuid>,
    pub deadline: Instant,
    timer: Option<AbortHandle>,
}

impl BookingOffer {
    pub fn new(
        booking_id: impl Into<String>,
        offered_to: impl IntoIterator<Item = Uuid>,
        deadline: Instant,
    ) -> Self {
        Self {
            booking_id: booking_id.into(),
            offered_to: offered_to.into_iter().collect(),
            accepted_by: None,
            deadline,
            timer: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted_by.is_some()
    }

    /// Stop the expiry timer; safe to call more than once
    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Offered partners other than the one who accepted
    pub fn others(&self) -> Vec<Uuid> {
        self.offered_to
            .iter()
            .filter(|p| Some(**p) != self.accepted_by)
            .copied()
            .collect()
    }
}

/// Result of a partner trying to take an offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Won,
    AlreadyAccepted,
    NotOffered,
    NoOffer,
}

/// Storage for live offers. Every method is atomic with respect to the others.
pub trait OfferStore: Send + Sync {
    /// Insert an offer, returning any offer it replaced
    fn insert(&self, offer: BookingOffer) -> Option<BookingOffer>;

    /// Attach the expiry timer; aborts it straight away if the offer is gone
    fn set_timer(&self, booking_id: &str, timer: AbortHandle);

    /// Check-and-set: the first offered partner to claim wins
    fn claim(&self, booking_id: &str, partner_id: Uuid) -> ClaimOutcome;

    /// Withdraw the offer from one partner. Has no effect once accepted.
    fn decline(&self, booking_id: &str, partner_id: Uuid) -> bool;

    /// Undo a claim whose commit failed; the claimant is dropped from the offer
    fn reopen(&self, booking_id: &str, partner_id: Uuid) -> Option<Instant>;

    /// Remove the offer if nobody has claimed it
    fn take_unaccepted(&self, booking_id: &str) -> Option<BookingOffer>;

    fn remove(&self, booking_id: &str) -> Option<BookingOffer>;

    fn offered_to(&self, booking_id: &str) -> Option<HashSet<Uuid>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct InMemoryOfferStore {
    offers: Mutex<HashMap<String, BookingOffer>>,
}

impl InMemoryOfferStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut HashMap<String, BookingOffer>) -> R) -> R {
        let mut guard = match self.offers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl OfferStore for InMemoryOfferStore {
    fn insert(&self, offer: BookingOffer) -> Option<BookingOffer> {
        self.with(|offers| offers.insert(offer.booking_id.clone(), offer))
    }

    fn set_timer(&self, booking_id: &str, timer: AbortHandle) {
        self.with(|offers| match offers.get_mut(booking_id) {
            Some(offer) => {
                offer.cancel_timer();
                offer.timer = Some(timer);
            }
            None => timer.abort(),
        })
    }

    fn claim(&self, booking_id: &str, partner_id: Uuid) -> ClaimOutcome {
        self.with(|offers| {
            let Some(offer) = offers.get_mut(booking_id) else {
                return ClaimOutcome::NoOffer;
            };
            if offer.is_accepted() {
                return ClaimOutcome::AlreadyAccepted;
            }
            if !offer.offered_to.contains(&partner_id) {
                return ClaimOutcome::NotOffered;
            }
            offer.accepted_by = Some(partner_id);
            ClaimOutcome::Won
        })
    }

    fn decline(&self, booking_id: &str, partner_id: Uuid) -> bool {
        self.with(|offers| match offers.get_mut(booking_id) {
            Some(offer) if !offer.is_accepted() => offer.offered_to.remove(&partner_id),
            _ => false,
        })
    }

    fn reopen(&self, booking_id: &str, partner_id: Uuid) -> Option<Instant> {
        self.with(|offers| {
            let offer = offers.get_mut(booking_id)?;
            if offer.accepted_by == Some(partner_id) {
                offer.accepted_by = None;
            }
            offer.offered_to.remove(&partner_id);
            Some(offer.deadline)
        })
    }

    fn take_unaccepted(&self, booking_id: &str) -> Option<BookingOffer> {
        self.with(|offers| match offers.get(booking_id) {
            Some(offer) if !offer.is_accepted() => offers.remove(booking_id),
            _ => None,
        })
    }

    fn remove(&self, booking_id: &str) -> Option<BookingOffer> {
        self.with(|offers| offers.remove(booking_id))
    }

    fn offered_to(&self, booking_id: &str) -> Option<HashSet<Uuid>> {
        self.with(|offers| offers.get(booking_id).map(|o| o.offered_to.clone()))
    }

    fn len(&self) -> usize {
        self.with(|offers| offers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_offer(partners: &[Uuid]) -> InMemoryOfferStore {
        let store = InMemoryOfferStore::new();
        store.insert(BookingOffer::new(
            "MWG00001",
            partners.iter().copied(),
            Instant::now(),
        ));
        store
    }

    #[test]
    fn test_first_claim_wins() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let store = store_with_offer(&[a, b]);

        assert_eq!(store.claim("MWG00001", a), ClaimOutcome::Won);
        assert_eq!(store.claim("MWG00001", b), ClaimOutcome::AlreadyAccepted);
        assert_eq!(store.claim("MWG00001", a), ClaimOutcome::AlreadyAccepted);
        assert_eq!(store.claim("MWG00002", a), ClaimOutcome::NoOffer);
    }

    #[test]
    fn test_claim_requires_offer() {
        let a = Uuid::new_v4();
        let store = store_with_offer(&[a]);
        assert_eq!(
            store.claim("MWG00001", Uuid::new_v4()),
            ClaimOutcome::NotOffered
        );
    }

    #[test]
    fn test_decline_does_not_touch_accepted_offer() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let store = store_with_offer(&[a, b]);

        assert!(store.decline("MWG00001", b));
        assert_eq!(store.claim("MWG00001", b), ClaimOutcome::NotOffered);
        assert_eq!(store.claim("MWG00001", a), ClaimOutcome::Won);
        assert!(!store.decline("MWG00001", a));
    }

    #[test]
    fn test_reopen_lets_another_partner_win() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let store = store_with_offer(&[a, b]);

        assert_eq!(store.claim("MWG00001", a), ClaimOutcome::Won);
        assert!(store.take_unaccepted("MWG00001").is_none());
        assert!(store.reopen("MWG00001", a).is_some());
        assert_eq!(store.claim("MWG00001", b), ClaimOutcome::Won);
    }

    #[test]
    fn test_others_excludes_winner() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let store = store_with_offer(&[a, b]);
        store.claim("MWG00001", a);
        let offer = store.remove("MWG00001").unwrap();
        assert_eq!(offer.others(), vec![b]);
        assert!(store.is_empty());
    }
}
