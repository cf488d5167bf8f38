//! Dispatch domain module
//!
//! Partner availability, live offers and the engine that ties them together.
//! All state here is process-local.

mod engine;
mod offers;
mod registry;

pub use engine::{AcceptOutcome, DispatchEngine};
pub use offers::{BookingOffer, ClaimOutcome, InMemoryOfferStore, OfferStore};
pub use registry::{AvailabilityRecord, InMemoryRegistry, PartnerRegistry};
