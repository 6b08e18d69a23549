use crate::application::bookings::{BookingManager, BookingRequest, TripFilter};
use crate::application::escrow::EscrowSettlementService;
use crate::application::settlement::{DirectVerification, EscrowInitiation, SettlementStrategy};
use crate::config::EngineConfig;
use crate::domain::booking::{Booking, BookingStatus};
use crate::domain::ledger::PaymentTransaction;
use crate::domain::payment::{PaymentClaim, PaymentRecord, PaymentStatus, SettlementPolicy};
use crate::domain::ports::{
    BookingStoreRef, LedgerGatewayRef, PaymentStoreRef, TripStoreRef, WalletDirectoryRef,
};
use crate::domain::trip::{NewTrip, Trip, TripStatus};
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Everything the engine reads from or writes to.
#[derive(Clone)]
pub struct EnginePorts {
    pub trips: TripStoreRef,
    pub bookings: BookingStoreRef,
    pub payments: PaymentStoreRef,
    pub wallets: WalletDirectoryRef,
    pub ledger: LedgerGatewayRef,
}

/// An escrowed payment that could not be paid out to the driver.
#[derive(Debug)]
pub struct ReleaseFailure {
    pub booking_id: Uuid,
    pub payment_id: Uuid,
    pub error: EngineError,
}

/// Outcome of paying escrowed funds out to a driver.
#[derive(Debug, Default)]
pub struct EscrowReleaseReport {
    pub released: Vec<PaymentRecord>,
    pub failed: Vec<ReleaseFailure>,
}

/// Outcome of a trip status change.
#[derive(Debug)]
pub struct TripCompletion {
    pub trip: Trip,
    pub completed_bookings: Vec<Booking>,
    pub escrow: EscrowReleaseReport,
}

/// The entry point for trips, bookings and their settlement.
///
/// `RideShareEngine` is `Send + Sync`; share it behind an `Arc` and call it from
/// as many tasks as needed. Seat inventory stays consistent under any interleaving
/// and every booking is confirmed at most once.
pub struct RideShareEngine {
    config: EngineConfig,
    ports: EnginePorts,
    manager: BookingManager,
    settlement: Box<dyn SettlementStrategy>,
    escrow: Arc<EscrowSettlementService>,
}

impl RideShareEngine {
    /// Creates a new `RideShareEngine` settling payments per `config.settlement.policy`.
    ///
    /// Fails with a validation error if `config` holds values the engine cannot run with.
    pub fn new(config: EngineConfig, ports: EnginePorts) -> Result<Self> {
        config.validate()?;
        let escrow = Arc::new(EscrowSettlementService::new(
            ports.ledger.clone(),
            ports.payments.clone(),
            &config.settlement,
        ));
        let settlement: Box<dyn SettlementStrategy> = match config.settlement.policy {
            SettlementPolicy::Direct => Box::new(DirectVerification::new(
                ports.trips.clone(),
                ports.bookings.clone(),
                ports.wallets.clone(),
                ports.ledger.clone(),
                config.settlement.clone(),
            )),
            SettlementPolicy::Escrow => Box::new(EscrowInitiation::new(
                ports.trips.clone(),
                ports.bookings.clone(),
            )),
        };
        let booking_escrow =
            (config.settlement.policy == SettlementPolicy::Escrow).then(|| escrow.clone());
        let manager = BookingManager::new(
            ports.trips.clone(),
            ports.bookings.clone(),
            &config,
            booking_escrow,
        );
        Ok(Self {
            config,
            ports,
            manager,
            settlement,
            escrow,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn policy(&self) -> SettlementPolicy {
        self.settlement.policy()
    }

    pub async fn create_trip(&self, new_trip: NewTrip) -> Result<Trip> {
        self.manager.create_trip(new_trip).await
    }

    pub async fn get_trip(&self, trip_id: Uuid) -> Result<Trip> {
        self.manager.get_trip(trip_id).await
    }

    pub async fn list_trips(&self, filter: &TripFilter) -> Result<Vec<Trip>> {
        self.manager.list_trips(filter).await
    }

    pub async fn trips_by_driver(&self, driver_id: &str) -> Result<Vec<Trip>> {
        self.manager.trips_by_driver(driver_id).await
    }

    /// Every trip in creation order.
    pub async fn all_trips(&self) -> Result<Vec<Trip>> {
        self.ports.trips.all().await
    }

    pub async fn create_booking(&self, request: BookingRequest) -> Result<Booking> {
        self.manager.create_booking(request).await
    }

    pub async fn get_booking(&self, booking_id: Uuid) -> Result<Booking> {
        self.manager.get_booking(booking_id).await
    }

    pub async fn bookings_for_trip(&self, trip_id: Uuid) -> Result<Vec<Booking>> {
        self.manager.bookings_for_trip(trip_id).await
    }

    pub async fn bookings_by_rider(&self, rider_id: &str) -> Result<Vec<Booking>> {
        self.manager.bookings_by_rider(rider_id).await
    }

    /// Every booking in creation order.
    pub async fn all_bookings(&self) -> Result<Vec<Booking>> {
        self.ports.bookings.all().await
    }

    pub async fn payments_for_booking(&self, booking_id: Uuid) -> Result<Vec<PaymentRecord>> {
        self.ports.payments.for_booking(booking_id).await
    }

    /// Applies a client-requested booking status.
    ///
    /// Only cancelling a pending booking and confirming it with a transaction id
    /// are accepted; asking for the current status changes nothing.
    pub async fn update_booking_status(
        &self,
        booking_id: Uuid,
        status: BookingStatus,
        payment_tx_id: Option<String>,
    ) -> Result<Booking> {
        let booking = self.manager.get_booking(booking_id).await?;
        if booking.status == status {
            return Ok(booking);
        }
        match (status, payment_tx_id) {
            (BookingStatus::Cancelled, _) => self.manager.cancel_booking(booking_id).await,
            (BookingStatus::Confirmed, Some(tx_id)) => {
                let claim = PaymentClaim::new(tx_id).with_amount(booking.total_fare);
                self.confirm_payment(booking_id, claim).await
            }
            (BookingStatus::Confirmed, None) => Err(EngineError::InvalidState(
                "Confirming a booking requires a payment transaction id".into(),
            )),
            (other, _) => Err(EngineError::InvalidState(format!(
                "Booking {booking_id} cannot be moved to {other} directly"
            ))),
        }
    }

    /// Confirms a booking against a payment the rider reports having made.
    pub async fn confirm_payment(&self, booking_id: Uuid, claim: PaymentClaim) -> Result<Booking> {
        self.settlement.settle(booking_id, claim).await
    }

    /// Changes a trip's status, completing its paid bookings when the trip completes.
    ///
    /// Escrowed payments of those bookings are then paid out to the driver. Payout
    /// failures do not undo the completion; they are listed in the outcome and can
    /// be retried with [`Self::release_pending_escrow`].
    pub async fn update_trip_status(&self, trip_id: Uuid, status: TripStatus) -> Result<TripCompletion> {
        let transition = self.manager.update_trip_status(trip_id, status).await?;
        let escrow = if transition.completed.is_empty() {
            EscrowReleaseReport::default()
        } else {
            self.release_escrowed(&transition.trip, &transition.completed)
                .await?
        };
        Ok(TripCompletion {
            trip: transition.trip,
            completed_bookings: transition.completed,
            escrow,
        })
    }

    /// Retries payouts for completed bookings whose funds are still in escrow.
    pub async fn release_pending_escrow(&self, trip_id: Uuid) -> Result<EscrowReleaseReport> {
        let trip = self.manager.get_trip(trip_id).await?;
        if trip.status != TripStatus::Completed {
            return Err(EngineError::InvalidState(format!(
                "Trip {trip_id} is {}, escrow is released on completion",
                trip.status
            )));
        }
        let bookings = self
            .manager
            .bookings_in(trip_id, BookingStatus::Completed)
            .await?;
        self.release_escrowed(&trip, &bookings).await
    }

    async fn release_escrowed(&self, trip: &Trip, bookings: &[Booking]) -> Result<EscrowReleaseReport> {
        let mut report = EscrowReleaseReport::default();
        let driver_wallet = self.ports.wallets.wallet_address(&trip.driver_id).await;

        for booking in bookings {
            let Some(escrow_address) = &booking.escrow_address else {
                continue;
            };
            let payments = self.ports.payments.for_booking(booking.id).await?;
            for payment in payments
                .iter()
                .filter(|p| p.status == PaymentStatus::Escrow)
            {
                let result = match &driver_wallet {
                    Ok(Some(wallet)) => {
                        self.escrow
                            .release_payment(payment, escrow_address, wallet)
                            .await
                    }
                    Ok(None) => Err(EngineError::MissingWallet(trip.driver_id.clone())),
                    Err(e) => Err(EngineError::InternalError(format!(
                        "Wallet lookup failed: {e}"
                    ))),
                };
                match result {
                    Ok(Some(released)) => report.released.push(released),
                    Ok(None) => {}
                    Err(error) => {
                        warn!(booking_id = %booking.id, payment_id = %payment.id, %error, "escrow release failed");
                        report.failed.push(ReleaseFailure {
                            booking_id: booking.id,
                            payment_id: payment.id,
                            error,
                        });
                    }
                }
            }
        }
        Ok(report)
    }

    /// Marks an escrowed payment as released without touching the ledger.
    pub async fn complete_payment(
        &self,
        payment_id: Uuid,
        release_tx_id: Option<String>,
    ) -> Result<PaymentRecord> {
        let payment = self
            .ports
            .payments
            .swap_status(
                payment_id,
                PaymentStatus::Escrow,
                PaymentStatus::Released,
                release_tx_id,
            )
            .await?;
        info!(%payment_id, "payment marked released");
        Ok(payment)
    }

    /// Address a rider must pay for `booking_id`: the booking's escrow account when
    /// it has one, otherwise the driver's wallet.
    pub async fn payee_for(&self, booking_id: Uuid) -> Result<String> {
        let booking = self.manager.get_booking(booking_id).await?;
        if let Some(address) = booking.escrow_address {
            return Ok(address);
        }
        let trip = self.manager.get_trip(booking.trip_id).await?;
        self.ports
            .wallets
            .wallet_address(&trip.driver_id)
            .await?
            .ok_or(EngineError::MissingWallet(trip.driver_id))
    }

    /// Unsigned payment for a client to sign with its own key.
    pub async fn build_payment(
        &self,
        sender: &str,
        receiver: &str,
        amount: Decimal,
    ) -> Result<PaymentTransaction> {
        self.escrow
            .build_payment(sender, receiver, amount, "ride payment")
            .await
    }

    /// Funds currently held in a booking's escrow account.
    pub async fn escrow_balance(&self, booking_id: Uuid) -> Result<Decimal> {
        let booking = self.manager.get_booking(booking_id).await?;
        let address = booking.escrow_address.ok_or_else(|| {
            EngineError::InvalidState(format!("Booking {booking_id} has no escrow account"))
        })?;
        self.escrow.balance(&address).await
    }
}
