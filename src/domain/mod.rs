//! Entities, value objects and the ports the application layer depends on.

pub mod booking;
pub mod fare;
pub mod ledger;
pub mod payment;
pub mod ports;
pub mod trip;
