//! Payment splits, gateway verification and the ledger that settles bookings

mod gateway;
mod ledger;
mod model;

pub use gateway::{PaymentGateway, RazorpayVerifier};
pub use ledger::PaymentLedger;
pub use model::*;
