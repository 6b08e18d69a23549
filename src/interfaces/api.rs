//! Request and response shapes for a transport in front of the engine.
//!
//! Field names follow the camelCase wire convention of the rider and driver
//! clients. Handlers authenticate elsewhere and pass the caller's user id in.

use crate::application::bookings::{BookingRequest, TripFilter};
use crate::application::engine::{RideShareEngine, TripCompletion};
use crate::domain::booking::{Booking, BookingStatus};
use crate::domain::payment::PaymentClaim;
use crate::domain::trip::TripStatus;
use crate::error::{EngineError, ErrorClass, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub trip_id: Uuid,
    pub rider_id: String,
    #[serde(default)]
    pub seats: Option<u32>,
}

impl From<CreateBookingRequest> for BookingRequest {
    fn from(request: CreateBookingRequest) -> Self {
        BookingRequest::new(request.trip_id, request.rider_id, request.seats)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBookingStatusRequest {
    pub status: String,
    #[serde(default)]
    pub payment_tx_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    pub tx_id: String,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

impl From<ConfirmPaymentRequest> for PaymentClaim {
    fn from(request: ConfirmPaymentRequest) -> Self {
        PaymentClaim {
            tx_id: request.tx_id,
            amount: request.amount,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTripStatusRequest {
    pub status: String,
}

/// Query string of the trip search.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
}

impl TryFrom<TripQuery> for TripFilter {
    type Error = EngineError;

    fn try_from(query: TripQuery) -> Result<Self> {
        let status = match query.status {
            Some(status) => status.parse()?,
            None => TripStatus::Active,
        };
        Ok(TripFilter {
            status,
            origin: query.origin,
            destination: query.destination,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripStatusResponse {
    pub trip_id: Uuid,
    pub status: TripStatus,
    pub completed_bookings: Vec<Uuid>,
    pub released_payments: Vec<Uuid>,
    pub failed_releases: Vec<Uuid>,
}

impl From<&TripCompletion> for TripStatusResponse {
    fn from(outcome: &TripCompletion) -> Self {
        Self {
            trip_id: outcome.trip.id,
            status: outcome.trip.status,
            completed_bookings: outcome.completed_bookings.iter().map(|b| b.id).collect(),
            released_payments: outcome.escrow.released.iter().map(|p| p.id).collect(),
            failed_releases: outcome.escrow.failed.iter().map(|f| f.payment_id).collect(),
        }
    }
}

/// Error payload returned to clients.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    /// The same request may succeed later.
    pub retryable: bool,
    /// A new ledger payment is needed; retrying this one will never succeed.
    pub terminal: bool,
}

impl From<&EngineError> for ErrorBody {
    fn from(error: &EngineError) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
            terminal: error.class() == ErrorClass::Terminal,
        }
    }
}

/// `POST /bookings`
pub async fn create_booking(engine: &RideShareEngine, request: CreateBookingRequest) -> Result<Booking> {
    engine.create_booking(request.into()).await
}

/// `PATCH /bookings/{id}`
pub async fn update_booking_status(
    engine: &RideShareEngine,
    booking_id: Uuid,
    request: UpdateBookingStatusRequest,
) -> Result<Booking> {
    let status: BookingStatus = request.status.parse()?;
    engine
        .update_booking_status(booking_id, status, request.payment_tx_id)
        .await
}

/// `POST /bookings/{id}/confirm-payment`
pub async fn confirm_payment(
    engine: &RideShareEngine,
    booking_id: Uuid,
    request: ConfirmPaymentRequest,
) -> Result<Booking> {
    engine.confirm_payment(booking_id, request.into()).await
}

/// `PATCH /trips/{id}`
pub async fn update_trip_status(
    engine: &RideShareEngine,
    trip_id: Uuid,
    request: UpdateTripStatusRequest,
) -> Result<TripStatusResponse> {
    let status: TripStatus = request.status.parse()?;
    let outcome = engine.update_trip_status(trip_id, status).await?;
    Ok(TripStatusResponse::from(&outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::engine::EnginePorts;
    use crate::config::EngineConfig;
    use crate::domain::ledger::TxType;
    use crate::domain::trip::{Location, NewTrip, Pricing};
    use crate::error::ErrorKind;
    use crate::infrastructure::in_memory::{InMemoryStore, InMemoryWalletDirectory};
    use crate::infrastructure::simulated_ledger::{SimulatedAccount, SimulatedLedger};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Fixture {
        engine: RideShareEngine,
        ledger: SimulatedLedger,
        rider: SimulatedAccount,
        driver: SimulatedAccount,
        trip_id: Uuid,
    }

    /// Direct settlement over in-memory stores with a three seat trip.
    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let wallets = InMemoryWalletDirectory::new();
        let ledger = SimulatedLedger::new();
        let driver = ledger.create_account().await;
        let rider = ledger.create_account().await;
        ledger.fund(&rider.address, 1_000_000).await;
        wallets.register("driver", driver.address.clone()).await;

        let mut config = EngineConfig::default();
        config.settlement.lookup_retry.max_attempts = 1;
        let engine = RideShareEngine::new(
            config,
            EnginePorts {
                trips: store.clone(),
                bookings: store.clone(),
                payments: store,
                wallets: Arc::new(wallets),
                ledger: Arc::new(ledger.clone()),
            },
        )
        .unwrap();
        let trip = engine
            .create_trip(NewTrip {
                id: None,
                driver_id: "driver".into(),
                origin: Location::named("Library"),
                destination: Location::named("Harbour"),
                distance: dec!(10),
                pricing: Pricing::PerDistanceUnit {
                    unit_price: dec!(0.01),
                },
                seats: 3,
                departure_time: None,
            })
            .await
            .unwrap();
        Fixture {
            engine,
            ledger,
            rider,
            driver,
            trip_id: trip.id,
        }
    }

    fn booking_request(trip_id: Uuid, seats: Option<u32>) -> CreateBookingRequest {
        CreateBookingRequest {
            trip_id,
            rider_id: "rider".into(),
            seats,
        }
    }

    #[tokio::test]
    async fn test_booking_lifecycle_through_handlers() {
        let f = fixture().await;
        let booking = create_booking(&f.engine, booking_request(f.trip_id, Some(2)))
            .await
            .unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.total_fare, dec!(0.2));

        let tx_id = f
            .ledger
            .record_transfer(&f.rider.address, &f.driver.address, 200_000, TxType::Payment)
            .await
            .unwrap();
        let confirmed = confirm_payment(
            &f.engine,
            booking.id,
            ConfirmPaymentRequest {
                tx_id: tx_id.clone(),
                amount: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert_eq!(confirmed.payment_tx_id, Some(tx_id));

        let response = update_trip_status(
            &f.engine,
            f.trip_id,
            UpdateTripStatusRequest {
                status: "completed".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(response.status, TripStatus::Completed);
        assert_eq!(response.completed_bookings, vec![booking.id]);
        assert!(response.released_payments.is_empty());
        assert!(response.failed_releases.is_empty());
    }

    #[tokio::test]
    async fn test_patch_booking_status() {
        let f = fixture().await;
        let booking = create_booking(&f.engine, booking_request(f.trip_id, None))
            .await
            .unwrap();

        let missing_tx = update_booking_status(
            &f.engine,
            booking.id,
            UpdateBookingStatusRequest {
                status: "confirmed".into(),
                payment_tx_id: None,
            },
        )
        .await;
        assert!(matches!(missing_tx, Err(EngineError::InvalidState(_))));

        let unknown = update_booking_status(
            &f.engine,
            booking.id,
            UpdateBookingStatusRequest {
                status: "refunded".into(),
                payment_tx_id: None,
            },
        )
        .await;
        assert!(matches!(unknown, Err(EngineError::ValidationError(_))));

        let cancelled = update_booking_status(
            &f.engine,
            booking.id,
            UpdateBookingStatusRequest {
                status: "Cancelled".into(),
                payment_tx_id: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(f.engine.get_trip(f.trip_id).await.unwrap().seats_available, 3);
    }

    #[tokio::test]
    async fn test_handler_errors_map_to_bodies() {
        let f = fixture().await;
        let err = create_booking(&f.engine, booking_request(f.trip_id, Some(4)))
            .await
            .unwrap_err();
        let body = ErrorBody::from(&err);
        assert_eq!(body.kind, ErrorKind::InsufficientCapacity.to_string());
        assert!(!body.retryable);
        assert!(!body.terminal);

        let booking = create_booking(&f.engine, booking_request(f.trip_id, Some(1)))
            .await
            .unwrap();
        let err = confirm_payment(
            &f.engine,
            booking.id,
            ConfirmPaymentRequest {
                tx_id: "NOT-ON-LEDGER".into(),
                amount: None,
            },
        )
        .await
        .unwrap_err();
        assert!(ErrorBody::from(&err).retryable);

        let err = update_trip_status(
            &f.engine,
            f.trip_id,
            UpdateTripStatusRequest {
                status: "paused".into(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(
            f.engine.get_trip(f.trip_id).await.unwrap().status,
            TripStatus::Active
        );
    }

    #[test]
    fn test_camel_case_requests() {
        let request: CreateBookingRequest = serde_json::from_str(
            r#"{"tripId": "7f1e2c4a-8a0b-4c59-9d0f-1f2a3b4c5d6e", "riderId": "u-42"}"#,
        )
        .unwrap();
        assert_eq!(request.rider_id, "u-42");
        assert!(request.seats.is_none());

        let confirm: ConfirmPaymentRequest =
            serde_json::from_str(r#"{"txId": "ABC", "amount": "0.2"}"#).unwrap();
        let claim = PaymentClaim::from(confirm);
        assert_eq!(claim.amount, Some(dec!(0.2)));
    }

    #[test]
    fn test_trip_query_defaults_to_active() {
        let filter = TripFilter::try_from(TripQuery::default()).unwrap();
        assert_eq!(filter.status, TripStatus::Active);

        let bad = TripQuery {
            status: Some("done".into()),
            ..TripQuery::default()
        };
        assert!(TripFilter::try_from(bad).is_err());
    }

    #[test]
    fn test_error_body() {
        let body = ErrorBody::from(&EngineError::TxNotFound("ABC".into()));
        assert_eq!(body.kind, "TxNotFound");
        assert!(body.retryable);
        assert!(!body.terminal);

        let body = ErrorBody::from(&EngineError::InsufficientAmount {
            expected: dec!(0.2),
            actual: dec!(0.1),
        });
        assert!(body.terminal);
        assert!(!body.retryable);
    }
}
