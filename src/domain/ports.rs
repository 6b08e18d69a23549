use super::booking::Booking;
use super::ledger::{Confirmation, LedgerTransaction};
use super::payment::{PaymentRecord, PaymentStatus};
use super::trip::Trip;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait TripStore: Send + Sync {
    async fn insert(&self, trip: Trip) -> Result<()>;
    async fn get(&self, trip_id: Uuid) -> Result<Option<Trip>>;
    async fn all(&self) -> Result<Vec<Trip>>;
    /// Persists `trip` only if the stored version still equals `expected_version`.
    ///
    /// On success the stored copy carries `expected_version + 1`; on a version
    /// mismatch nothing is written and `Ok(false)` is returned.
    async fn compare_and_swap(&self, trip: Trip, expected_version: u64) -> Result<bool>;
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn insert(&self, booking: Booking) -> Result<()>;
    async fn get(&self, booking_id: Uuid) -> Result<Option<Booking>>;
    async fn for_trip(&self, trip_id: Uuid) -> Result<Vec<Booking>>;
    async fn for_rider(&self, rider_id: &str) -> Result<Vec<Booking>>;
    async fn all(&self) -> Result<Vec<Booking>>;
    /// Cancels a pending booking, returning the updated record.
    async fn cancel(&self, booking_id: Uuid) -> Result<Booking>;
    /// Atomically confirms a still-pending booking with `payment.tx_id` and appends
    /// `payment`. Fails without writing anything when the booking moved on, its
    /// stored trip has finished, or the transaction already settled another booking.
    async fn confirm_with_payment(&self, booking_id: Uuid, payment: PaymentRecord)
    -> Result<Booking>;
    /// Moves every confirmed booking of a trip to completed as a single batch.
    async fn complete_confirmed(&self, trip_id: Uuid) -> Result<Vec<Booking>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn get(&self, payment_id: Uuid) -> Result<Option<PaymentRecord>>;
    async fn for_booking(&self, booking_id: Uuid) -> Result<Vec<PaymentRecord>>;
    async fn find_by_tx(&self, tx_id: &str) -> Result<Option<PaymentRecord>>;
    /// Atomically moves a payment from `expected` to `next`, see
    /// [`PaymentRecord::advance`]. Writes nothing when the stored status differs.
    async fn swap_status(
        &self,
        payment_id: Uuid,
        expected: PaymentStatus,
        next: PaymentStatus,
        release_tx_id: Option<String>,
    ) -> Result<PaymentRecord>;
}

/// Read access to user wallets, owned by the profile service.
#[async_trait]
pub trait WalletDirectory: Send + Sync {
    async fn wallet_address(&self, user_id: &str) -> Result<Option<String>>;
}

/// Read and write access to the external settlement ledger.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// `None` while the ledger has not indexed the transaction.
    async fn lookup_transaction(&self, tx_id: &str) -> Result<Option<LedgerTransaction>>;
    async fn submit_signed_transaction(&self, bytes: &[u8]) -> Result<String>;
    /// Waits at most `max_rounds` rounds for `tx_id` to be included.
    async fn await_confirmation(&self, tx_id: &str, max_rounds: u64) -> Result<Confirmation>;
    async fn account_balance(&self, address: &str) -> Result<u64>;
    async fn current_round(&self) -> Result<u64>;
}

pub type TripStoreRef = Arc<dyn TripStore>;
pub type BookingStoreRef = Arc<dyn BookingStore>;
pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type WalletDirectoryRef = Arc<dyn WalletDirectory>;
pub type LedgerGatewayRef = Arc<dyn LedgerGateway>;
