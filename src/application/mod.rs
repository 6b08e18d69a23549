//! Application layer orchestrating trips, bookings and payment settlement.
//!
//! [`engine::RideShareEngine`] is the entry point. It delegates seat inventory to
//! the capacity ledger, booking lifecycles to the booking manager and payment
//! confirmation to the deployment's settlement strategy.

pub mod bookings;
pub mod capacity;
pub mod engine;
pub mod escrow;
pub mod retry;
pub mod settlement;
