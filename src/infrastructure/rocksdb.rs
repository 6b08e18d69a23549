use crate::domain::booking::{Booking, BookingStatus};
use crate::domain::payment::{PaymentRecord, PaymentStatus};
use crate::domain::ports::{BookingStore, PaymentStore, TripStore};
use crate::domain::trip::Trip;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, ErrorKind, IteratorMode, OptimisticTransactionDB,
    Options, Transaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Column Family for trips, keyed by trip id.
pub const CF_TRIPS: &str = "trips";
/// Column Family for bookings, keyed by booking id.
pub const CF_BOOKINGS: &str = "bookings";
/// Column Family for payment records, keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Ledger transaction id to the payment record it settled.
pub const CF_PAYMENT_TX: &str = "payment_tx";

/// Commits retried after an optimistic conflict before giving up.
const COMMIT_ATTEMPTS: usize = 16;

type Db = OptimisticTransactionDB;

/// A persistent store implementation using RocksDB.
///
/// Every multi-key change runs in an optimistic transaction: keys are read with
/// `get_for_update_cf`, and a commit that lost a race is retried from a fresh read.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<Db>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path` with all column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_TRIPS, CF_BOOKINGS, CF_PAYMENTS, CF_PAYMENT_TX]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = Db::open_cf_descriptors(&opts, path, families)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| EngineError::InternalError(format!("Column family {name} not found")))
    }

    fn read<T: DeserializeOwned>(&self, cf_name: &str, key: Uuid) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    /// Runs `body` in an optimistic transaction, retrying when the commit conflicts.
    fn transact<T>(&self, mut body: impl FnMut(&Transaction<'_, Db>) -> Result<T>) -> Result<T> {
        for _ in 0..COMMIT_ATTEMPTS {
            let txn = self.db.transaction();
            let value = body(&txn)?;
            match txn.commit() {
                Ok(()) => return Ok(value),
                Err(e) if matches!(e.kind(), ErrorKind::Busy | ErrorKind::TryAgain) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Contention("storage commit".to_string()))
    }

    fn locked<T: DeserializeOwned>(
        &self,
        txn: &Transaction<'_, Db>,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match txn.get_for_update_cf(cf, key, true)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(
        &self,
        txn: &Transaction<'_, Db>,
        cf_name: &str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        let cf = self.cf(cf_name)?;
        txn.put_cf(cf, key, serde_json::to_vec(value)?)?;
        Ok(())
    }
}

#[async_trait]
impl TripStore for RocksDBStore {
    async fn insert(&self, trip: Trip) -> Result<()> {
        self.transact(|txn| {
            let key = trip.id.as_bytes();
            if self.locked::<Trip>(txn, CF_TRIPS, key)?.is_some() {
                return Err(EngineError::InvalidState(format!(
                    "Trip {} already exists",
                    trip.id
                )));
            }
            self.write(txn, CF_TRIPS, key, &trip)
        })
    }

    async fn get(&self, trip_id: Uuid) -> Result<Option<Trip>> {
        self.read(CF_TRIPS, trip_id)
    }

    async fn all(&self) -> Result<Vec<Trip>> {
        let mut trips: Vec<Trip> = self.scan(CF_TRIPS)?;
        trips.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(trips)
    }

    async fn compare_and_swap(&self, trip: Trip, expected_version: u64) -> Result<bool> {
        self.transact(|txn| {
            let key = trip.id.as_bytes();
            let current: Trip = self
                .locked(txn, CF_TRIPS, key)?
                .ok_or_else(|| EngineError::not_found("Trip", trip.id))?;
            if current.version != expected_version {
                return Ok(false);
            }
            let mut next = trip.clone();
            next.version = expected_version + 1;
            self.write(txn, CF_TRIPS, key, &next)?;
            Ok(true)
        })
    }
}

fn newest_first(bookings: &mut [Booking]) {
    bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[async_trait]
impl BookingStore for RocksDBStore {
    async fn insert(&self, booking: Booking) -> Result<()> {
        self.transact(|txn| {
            let key = booking.id.as_bytes();
            if self.locked::<Booking>(txn, CF_BOOKINGS, key)?.is_some() {
                return Err(EngineError::InvalidState(format!(
                    "Booking {} already exists",
                    booking.id
                )));
            }
            self.write(txn, CF_BOOKINGS, key, &booking)
        })
    }

    async fn get(&self, booking_id: Uuid) -> Result<Option<Booking>> {
        self.read(CF_BOOKINGS, booking_id)
    }

    async fn for_trip(&self, trip_id: Uuid) -> Result<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self.scan(CF_BOOKINGS)?;
        bookings.retain(|b| b.trip_id == trip_id);
        newest_first(&mut bookings);
        Ok(bookings)
    }

    async fn for_rider(&self, rider_id: &str) -> Result<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self.scan(CF_BOOKINGS)?;
        bookings.retain(|b| b.rider_id == rider_id);
        newest_first(&mut bookings);
        Ok(bookings)
    }

    async fn all(&self) -> Result<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self.scan(CF_BOOKINGS)?;
        bookings.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(bookings)
    }

    async fn cancel(&self, booking_id: Uuid) -> Result<Booking> {
        self.transact(|txn| {
            let key = booking_id.as_bytes();
            let mut booking: Booking = self
                .locked(txn, CF_BOOKINGS, key)?
                .ok_or_else(|| EngineError::not_found("Booking", booking_id))?;
            booking.cancel()?;
            self.write(txn, CF_BOOKINGS, key, &booking)?;
            Ok(booking)
        })
    }

    async fn confirm_with_payment(
        &self,
        booking_id: Uuid,
        payment: PaymentRecord,
    ) -> Result<Booking> {
        self.transact(|txn| {
            let key = booking_id.as_bytes();
            let mut booking: Booking = self
                .locked(txn, CF_BOOKINGS, key)?
                .ok_or_else(|| EngineError::not_found("Booking", booking_id))?;
            booking.confirm(&payment.tx_id)?;
            // conflicts with a concurrent status change of the trip
            if let Some(trip) = self.locked::<Trip>(txn, CF_TRIPS, booking.trip_id.as_bytes())? {
                trip.ensure_payable()?;
            }

            let tx_key = payment.tx_id.as_bytes();
            if self.locked::<Uuid>(txn, CF_PAYMENT_TX, tx_key)?.is_some() {
                return Err(EngineError::TxAlreadyUsed(payment.tx_id.clone()));
            }

            self.write(txn, CF_BOOKINGS, key, &booking)?;
            self.write(txn, CF_PAYMENTS, payment.id.as_bytes(), &payment)?;
            self.write(txn, CF_PAYMENT_TX, tx_key, &payment.id)?;
            Ok(booking)
        })
    }

    async fn complete_confirmed(&self, trip_id: Uuid) -> Result<Vec<Booking>> {
        let candidates: Vec<Uuid> = self
            .scan::<Booking>(CF_BOOKINGS)?
            .into_iter()
            .filter(|b| b.trip_id == trip_id && b.status == BookingStatus::Confirmed)
            .map(|b| b.id)
            .collect();

        self.transact(|txn| {
            let mut completed = Vec::new();
            for id in &candidates {
                let key = id.as_bytes();
                let Some(mut booking) = self.locked::<Booking>(txn, CF_BOOKINGS, key)? else {
                    continue;
                };
                if booking.status != BookingStatus::Confirmed {
                    continue;
                }
                booking.complete()?;
                self.write(txn, CF_BOOKINGS, key, &booking)?;
                completed.push(booking);
            }
            Ok(completed)
        })
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn get(&self, payment_id: Uuid) -> Result<Option<PaymentRecord>> {
        self.read(CF_PAYMENTS, payment_id)
    }

    async fn for_booking(&self, booking_id: Uuid) -> Result<Vec<PaymentRecord>> {
        let mut payments: Vec<PaymentRecord> = self.scan(CF_PAYMENTS)?;
        payments.retain(|p| p.booking_id == booking_id);
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn find_by_tx(&self, tx_id: &str) -> Result<Option<PaymentRecord>> {
        let cf = self.cf(CF_PAYMENT_TX)?;
        let Some(bytes) = self.db.get_cf(cf, tx_id.as_bytes())? else {
            return Ok(None);
        };
        let payment_id: Uuid = serde_json::from_slice(&bytes)?;
        self.read(CF_PAYMENTS, payment_id)
    }

    async fn swap_status(
        &self,
        payment_id: Uuid,
        expected: PaymentStatus,
        next: PaymentStatus,
        release_tx_id: Option<String>,
    ) -> Result<PaymentRecord> {
        self.transact(|txn| {
            let key = payment_id.as_bytes();
            let mut payment: PaymentRecord = self
                .locked(txn, CF_PAYMENTS, key)?
                .ok_or_else(|| EngineError::not_found("Payment", payment_id))?;
            payment.advance(expected, next, release_tx_id.clone())?;
            self.write(txn, CF_PAYMENTS, key, &payment)?;
            Ok(payment)
        })
    }
}
