//! Deciding when a booking counts as paid.
//!
//! A deployment runs exactly one [`SettlementStrategy`]. Both strategies read what
//! they need, talk to the ledger without holding any store lock, and then commit
//! through [`BookingStore::confirm_with_payment`], which re-checks that the
//! booking is still pending, its trip still live and the transaction unused.
//!
//! [`BookingStore::confirm_with_payment`]: crate::domain::ports::BookingStore::confirm_with_payment

use crate::application::retry::Attempt;
use crate::config::SettlementConfig;
use crate::domain::booking::{Booking, BookingStatus};
use crate::domain::fare::{from_minor_units, to_minor_units};
use crate::domain::ledger::{LedgerTransaction, TxType, same_address};
use crate::domain::payment::{PaymentClaim, PaymentRecord, PaymentStatus, SettlementPolicy};
use crate::domain::ports::{BookingStoreRef, LedgerGatewayRef, TripStoreRef, WalletDirectoryRef};
use crate::domain::trip::Trip;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

#[async_trait]
pub trait SettlementStrategy: Send + Sync {
    fn policy(&self) -> SettlementPolicy;

    /// Confirms `booking_id` against `claim`, appending exactly one payment record.
    async fn settle(&self, booking_id: Uuid, claim: PaymentClaim) -> Result<Booking>;
}

/// Checks that `actual_minor` covers `expected` within the configured tolerance.
pub fn check_amount(expected: Decimal, actual_minor: u64, config: &SettlementConfig) -> Result<()> {
    let expected_minor = to_minor_units(expected, config.minor_units_per_major)?;
    let threshold = Decimal::from(expected_minor) * (Decimal::ONE - config.amount_tolerance);
    if Decimal::from(actual_minor) < threshold {
        return Err(EngineError::InsufficientAmount {
            expected,
            actual: from_minor_units(actual_minor, config.minor_units_per_major),
        });
    }
    Ok(())
}

async fn pending_booking(bookings: &BookingStoreRef, booking_id: Uuid) -> Result<Booking> {
    let booking = bookings
        .get(booking_id)
        .await?
        .ok_or_else(|| EngineError::not_found("Booking", booking_id))?;
    match booking.status {
        BookingStatus::Pending => Ok(booking),
        BookingStatus::Confirmed => Err(EngineError::AlreadyConfirmed(booking.id)),
        other => Err(EngineError::InvalidState(format!(
            "Booking {} is {other} and cannot be paid",
            booking.id
        ))),
    }
}

async fn live_trip(trips: &TripStoreRef, booking: &Booking) -> Result<Trip> {
    let trip = trips
        .get(booking.trip_id)
        .await?
        .ok_or_else(|| EngineError::not_found("Trip", booking.trip_id))?;
    trip.ensure_payable()?;
    Ok(trip)
}

/// Confirms a booking only once the ledger shows a payment to the driver's wallet.
pub struct DirectVerification {
    trips: TripStoreRef,
    bookings: BookingStoreRef,
    wallets: WalletDirectoryRef,
    ledger: LedgerGatewayRef,
    config: SettlementConfig,
}

impl DirectVerification {
    pub fn new(
        trips: TripStoreRef,
        bookings: BookingStoreRef,
        wallets: WalletDirectoryRef,
        ledger: LedgerGatewayRef,
        config: SettlementConfig,
    ) -> Self {
        Self {
            trips,
            bookings,
            wallets,
            ledger,
            config,
        }
    }

    async fn lookup(&self, tx_id: &str) -> Result<LedgerTransaction> {
        let ledger = &self.ledger;
        let found = self
            .config
            .lookup_retry
            .run(move || async move {
                Ok(match ledger.lookup_transaction(tx_id).await? {
                    Some(tx) if tx.confirmed_round.is_some() => Attempt::Done(tx),
                    _ => Attempt::Retry,
                })
            })
            .await?;
        found.ok_or_else(|| EngineError::TxNotFound(tx_id.to_string()))
    }
}

#[async_trait]
impl SettlementStrategy for DirectVerification {
    fn policy(&self) -> SettlementPolicy {
        SettlementPolicy::Direct
    }

    async fn settle(&self, booking_id: Uuid, claim: PaymentClaim) -> Result<Booking> {
        let tx_id = claim.tx_id.trim();
        if tx_id.is_empty() {
            return Err(EngineError::ValidationError(
                "Transaction id is required".to_string(),
            ));
        }

        let booking = pending_booking(&self.bookings, booking_id).await?;
        let trip = live_trip(&self.trips, &booking).await?;
        let wallet = self
            .wallets
            .wallet_address(&trip.driver_id)
            .await?
            .ok_or_else(|| EngineError::MissingWallet(trip.driver_id.clone()))?;

        let tx = self.lookup(tx_id).await?;
        if tx.tx_type != TxType::Payment {
            return Err(EngineError::WrongTxType {
                tx_id: tx.id,
                actual: tx.tx_type.to_string(),
            });
        }
        let receiver = tx.receiver.clone().unwrap_or_default();
        if !same_address(&receiver, &wallet) {
            warn!(%booking_id, %tx_id, "payment sent to the wrong address");
            return Err(EngineError::ReceiverMismatch {
                expected: wallet,
                actual: receiver,
            });
        }
        check_amount(booking.total_fare, tx.amount_minor, &self.config)?;

        let record = PaymentRecord::new(
            booking.id,
            booking.rider_id.clone(),
            tx.id.clone(),
            from_minor_units(tx.amount_minor, self.config.minor_units_per_major),
            PaymentStatus::Completed,
            true,
        );
        let confirmed = self.bookings.confirm_with_payment(booking.id, record).await?;
        info!(%booking_id, tx_id = %tx.id, amount_minor = tx.amount_minor, "payment verified on ledger");
        Ok(confirmed)
    }
}

/// Records the rider's claim of having paid into the booking's escrow account.
///
/// Nothing is checked against the ledger before confirming; the escrow balance is
/// only observed when funds are released to the driver.
pub struct EscrowInitiation {
    trips: TripStoreRef,
    bookings: BookingStoreRef,
}

impl EscrowInitiation {
    pub fn new(trips: TripStoreRef, bookings: BookingStoreRef) -> Self {
        Self { trips, bookings }
    }
}

#[async_trait]
impl SettlementStrategy for EscrowInitiation {
    fn policy(&self) -> SettlementPolicy {
        SettlementPolicy::Escrow
    }

    async fn settle(&self, booking_id: Uuid, claim: PaymentClaim) -> Result<Booking> {
        let tx_id = claim.tx_id.trim();
        if tx_id.is_empty() {
            return Err(EngineError::ValidationError(
                "Transaction id is required".to_string(),
            ));
        }

        let booking = pending_booking(&self.bookings, booking_id).await?;
        live_trip(&self.trips, &booking).await?;
        let amount = claim.amount.unwrap_or(booking.total_fare);
        if amount <= Decimal::ZERO {
            return Err(EngineError::ValidationError(format!(
                "Payment amount must be positive, got {amount}"
            )));
        }

        let record = PaymentRecord::new(
            booking.id,
            booking.rider_id.clone(),
            tx_id.to_string(),
            amount,
            PaymentStatus::Escrow,
            false,
        );
        let confirmed = self.bookings.confirm_with_payment(booking.id, record).await?;
        info!(%booking_id, %tx_id, %amount, "escrow payment recorded without ledger verification");
        Ok(confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tolerance_boundary() {
        let config = SettlementConfig::default();
        // 0.2 expected is 200_000 minor units; 1% tolerance accepts 198_000.
        assert!(check_amount(dec!(0.2), 200_000, &config).is_ok());
        assert!(check_amount(dec!(0.2), 198_000, &config).is_ok());

        let err = check_amount(dec!(0.2), 197_800, &config).unwrap_err();
        match err {
            EngineError::InsufficientAmount { expected, actual } => {
                assert_eq!(expected, dec!(0.2));
                assert_eq!(actual, dec!(0.1978));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_tolerance() {
        let config = SettlementConfig {
            amount_tolerance: Decimal::ZERO,
            ..SettlementConfig::default()
        };
        assert!(check_amount(dec!(1), 999_999, &config).is_err());
        assert!(check_amount(dec!(1), 1_000_000, &config).is_ok());
    }

    #[test]
    fn test_overpayment_accepted() {
        let config = SettlementConfig::default();
        assert!(check_amount(dec!(0.5), 900_000, &config).is_ok());
    }
}
