use crate::domain::booking::{Booking, BookingStatus};
use crate::domain::payment::{PaymentRecord, PaymentStatus};
use crate::domain::ports::{BookingStore, PaymentStore, TripStore, WalletDirectory};
use crate::domain::trip::Trip;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    trips: HashMap<Uuid, Trip>,
    bookings: HashMap<Uuid, Booking>,
    payments: HashMap<Uuid, PaymentRecord>,
}

/// A thread-safe in-memory store for trips, bookings and payments.
///
/// The three tables share one `RwLock` so that multi-entity operations such as
/// confirming a booking together with its payment record are atomic. Critical
/// sections only touch the maps and never await anything else.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(bookings: &mut [Booking]) {
    bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[async_trait]
impl TripStore for InMemoryStore {
    async fn insert(&self, trip: Trip) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.trips.contains_key(&trip.id) {
            return Err(EngineError::InvalidState(format!(
                "Trip {} already exists",
                trip.id
            )));
        }
        tables.trips.insert(trip.id, trip);
        Ok(())
    }

    async fn get(&self, trip_id: Uuid) -> Result<Option<Trip>> {
        let tables = self.tables.read().await;
        Ok(tables.trips.get(&trip_id).cloned())
    }

    async fn all(&self) -> Result<Vec<Trip>> {
        let tables = self.tables.read().await;
        let mut trips: Vec<Trip> = tables.trips.values().cloned().collect();
        trips.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(trips)
    }

    async fn compare_and_swap(&self, mut trip: Trip, expected_version: u64) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let Some(current) = tables.trips.get_mut(&trip.id) else {
            return Err(EngineError::not_found("Trip", trip.id));
        };
        if current.version != expected_version {
            return Ok(false);
        }
        trip.version = expected_version + 1;
        *current = trip;
        Ok(true)
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn insert(&self, booking: Booking) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.bookings.contains_key(&booking.id) {
            return Err(EngineError::InvalidState(format!(
                "Booking {} already exists",
                booking.id
            )));
        }
        tables.bookings.insert(booking.id, booking);
        Ok(())
    }

    async fn get(&self, booking_id: Uuid) -> Result<Option<Booking>> {
        let tables = self.tables.read().await;
        Ok(tables.bookings.get(&booking_id).cloned())
    }

    async fn for_trip(&self, trip_id: Uuid) -> Result<Vec<Booking>> {
        let tables = self.tables.read().await;
        let mut bookings: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|b| b.trip_id == trip_id)
            .cloned()
            .collect();
        newest_first(&mut bookings);
        Ok(bookings)
    }

    async fn for_rider(&self, rider_id: &str) -> Result<Vec<Booking>> {
        let tables = self.tables.read().await;
        let mut bookings: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|b| b.rider_id == rider_id)
            .cloned()
            .collect();
        newest_first(&mut bookings);
        Ok(bookings)
    }

    async fn all(&self) -> Result<Vec<Booking>> {
        let tables = self.tables.read().await;
        let mut bookings: Vec<Booking> = tables.bookings.values().cloned().collect();
        bookings.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(bookings)
    }

    async fn cancel(&self, booking_id: Uuid) -> Result<Booking> {
        let mut tables = self.tables.write().await;
        let booking = tables
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| EngineError::not_found("Booking", booking_id))?;
        booking.cancel()?;
        Ok(booking.clone())
    }

    async fn confirm_with_payment(
        &self,
        booking_id: Uuid,
        payment: PaymentRecord,
    ) -> Result<Booking> {
        let mut tables = self.tables.write().await;
        let mut booking = tables
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("Booking", booking_id))?;
        booking.confirm(&payment.tx_id)?;
        if let Some(trip) = tables.trips.get(&booking.trip_id) {
            trip.ensure_payable()?;
        }
        if tables.payments.values().any(|p| p.tx_id == payment.tx_id) {
            return Err(EngineError::TxAlreadyUsed(payment.tx_id));
        }
        tables.bookings.insert(booking_id, booking.clone());
        tables.payments.insert(payment.id, payment);
        Ok(booking)
    }

    async fn complete_confirmed(&self, trip_id: Uuid) -> Result<Vec<Booking>> {
        let mut tables = self.tables.write().await;
        let mut completed = Vec::new();
        for booking in tables.bookings.values_mut() {
            if booking.trip_id == trip_id && booking.status == BookingStatus::Confirmed {
                booking.complete()?;
                completed.push(booking.clone());
            }
        }
        Ok(completed)
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn get(&self, payment_id: Uuid) -> Result<Option<PaymentRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.payments.get(&payment_id).cloned())
    }

    async fn for_booking(&self, booking_id: Uuid) -> Result<Vec<PaymentRecord>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<PaymentRecord> = tables
            .payments
            .values()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn find_by_tx(&self, tx_id: &str) -> Result<Option<PaymentRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.payments.values().find(|p| p.tx_id == tx_id).cloned())
    }

    async fn swap_status(
        &self,
        payment_id: Uuid,
        expected: PaymentStatus,
        next: PaymentStatus,
        release_tx_id: Option<String>,
    ) -> Result<PaymentRecord> {
        let mut tables = self.tables.write().await;
        let payment = tables
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| EngineError::not_found("Payment", payment_id))?;
        payment.advance(expected, next, release_tx_id)?;
        Ok(payment.clone())
    }
}

/// Wallet addresses keyed by user id.
#[derive(Default, Clone)]
pub struct InMemoryWalletDirectory {
    wallets: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryWalletDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, user_id: impl Into<String>, address: impl Into<String>) {
        let mut wallets = self.wallets.write().await;
        wallets.insert(user_id.into(), address.into());
    }
}

#[async_trait]
impl WalletDirectory for InMemoryWalletDirectory {
    async fn wallet_address(&self, user_id: &str) -> Result<Option<String>> {
        let wallets = self.wallets.read().await;
        Ok(wallets.get(user_id).cloned())
    }
}
