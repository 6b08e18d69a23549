//! Trip publication, booking creation and the status state machines.

use crate::application::capacity::TripCapacityLedger;
use crate::application::escrow::EscrowSettlementService;
use crate::config::EngineConfig;
use crate::domain::booking::{Booking, BookingStatus};
use crate::domain::fare::{FareModel, fare};
use crate::domain::ports::{BookingStoreRef, TripStoreRef};
use crate::domain::trip::{NewTrip, Pricing, Trip, TripStatus};
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A rider's request for seats.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    /// Caller-chosen id, otherwise a random one is assigned.
    pub id: Option<Uuid>,
    pub trip_id: Uuid,
    pub rider_id: String,
    /// Defaults to a single seat.
    pub seats: Option<u32>,
}

impl BookingRequest {
    pub fn new(trip_id: Uuid, rider_id: impl Into<String>, seats: Option<u32>) -> Self {
        Self {
            id: None,
            trip_id,
            rider_id: rider_id.into(),
            seats,
        }
    }
}

/// Filters for [`BookingManager::list_trips`].
#[derive(Debug, Clone)]
pub struct TripFilter {
    pub status: TripStatus,
    /// Case-insensitive substring of the origin name.
    pub origin: Option<String>,
    pub destination: Option<String>,
}

impl Default for TripFilter {
    fn default() -> Self {
        Self {
            status: TripStatus::Active,
            origin: None,
            destination: None,
        }
    }
}

impl TripFilter {
    fn matches(&self, trip: &Trip) -> bool {
        fn contains(haystack: &str, needle: &Option<String>) -> bool {
            needle
                .as_ref()
                .is_none_or(|n| haystack.to_lowercase().contains(&n.to_lowercase()))
        }
        trip.status == self.status
            && contains(&trip.origin.name, &self.origin)
            && contains(&trip.destination.name, &self.destination)
    }
}

/// Result of a trip status change.
#[derive(Debug, Clone)]
pub struct TripTransition {
    pub trip: Trip,
    /// Bookings the change moved from confirmed to completed.
    pub completed: Vec<Booking>,
}

/// Owns the booking state machine and the multi-entity booking transaction.
pub struct BookingManager {
    trips: TripStoreRef,
    bookings: BookingStoreRef,
    capacity: TripCapacityLedger,
    fare_model: FareModel,
    /// Present only when bookings settle through escrow.
    escrow: Option<Arc<EscrowSettlementService>>,
}

impl BookingManager {
    pub fn new(
        trips: TripStoreRef,
        bookings: BookingStoreRef,
        config: &EngineConfig,
        escrow: Option<Arc<EscrowSettlementService>>,
    ) -> Self {
        Self {
            capacity: TripCapacityLedger::new(trips.clone(), &config.capacity),
            trips,
            bookings,
            fare_model: config.fare.model,
            escrow,
        }
    }

    pub async fn create_trip(&self, new_trip: NewTrip) -> Result<Trip> {
        if new_trip.driver_id.trim().is_empty() {
            return Err(EngineError::ValidationError("Driver is required".into()));
        }
        if new_trip.origin.name.trim().is_empty() || new_trip.destination.name.trim().is_empty() {
            return Err(EngineError::ValidationError(
                "Origin and destination are required".into(),
            ));
        }
        if new_trip.seats == 0 {
            return Err(EngineError::ValidationError(
                "A trip needs at least one seat".into(),
            ));
        }
        if new_trip.distance < Decimal::ZERO {
            return Err(EngineError::ValidationError(format!(
                "Distance cannot be negative: {}",
                new_trip.distance
            )));
        }
        let rate = match new_trip.pricing {
            Pricing::Flat { price } => price,
            Pricing::PerDistanceUnit { unit_price } => unit_price,
        };
        if rate < Decimal::ZERO {
            return Err(EngineError::ValidationError(format!(
                "Price cannot be negative: {rate}"
            )));
        }
        if !self.fare_model.matches(&new_trip.pricing) {
            return Err(EngineError::ValidationError(format!(
                "This deployment prices trips with the {} model",
                self.fare_model
            )));
        }

        let trip = Trip::new(new_trip);
        // every later booking is priced for at most this many seats
        fare(&trip, trip.total_seats)?;
        self.trips.insert(trip.clone()).await?;
        info!(trip_id = %trip.id, driver = %trip.driver_id, seats = trip.total_seats, "trip created");
        Ok(trip)
    }

    pub async fn get_trip(&self, trip_id: Uuid) -> Result<Trip> {
        self.trips
            .get(trip_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Trip", trip_id))
    }

    pub async fn list_trips(&self, filter: &TripFilter) -> Result<Vec<Trip>> {
        let trips = self.trips.all().await?;
        Ok(trips.into_iter().filter(|t| filter.matches(t)).collect())
    }

    pub async fn trips_by_driver(&self, driver_id: &str) -> Result<Vec<Trip>> {
        let trips = self.trips.all().await?;
        Ok(trips
            .into_iter()
            .filter(|t| t.driver_id == driver_id)
            .collect())
    }

    /// Reserves seats, prices them and persists a pending booking.
    ///
    /// Seats taken for a booking that ends up not persisted are handed back before
    /// the error is returned.
    pub async fn create_booking(&self, request: BookingRequest) -> Result<Booking> {
        let seats = request.seats.unwrap_or(1);
        if seats == 0 {
            return Err(EngineError::ValidationError(
                "Seats must be at least 1".into(),
            ));
        }
        if request.rider_id.trim().is_empty() {
            return Err(EngineError::ValidationError("Rider is required".into()));
        }

        let snapshot = self.capacity.reserve(request.trip_id, seats).await?;

        match self.persist_booking(&request, &snapshot, seats).await {
            Ok(booking) => {
                info!(
                    booking_id = %booking.id,
                    trip_id = %booking.trip_id,
                    seats,
                    fare = %booking.total_fare,
                    "booking created"
                );
                Ok(booking)
            }
            Err(e) => {
                self.compensate(request.trip_id, seats).await;
                Err(e)
            }
        }
    }

    async fn persist_booking(&self, request: &BookingRequest, trip: &Trip, seats: u32) -> Result<Booking> {
        if trip.driver_id == request.rider_id {
            return Err(EngineError::SelfBooking);
        }
        let mut booking = Booking::new(
            trip.id,
            request.rider_id.clone(),
            seats,
            fare(trip, seats)?,
        );
        if let Some(id) = request.id {
            booking.id = id;
        }
        if let Some(escrow) = &self.escrow {
            booking.escrow_address = Some(escrow.generate_escrow_account().await);
        }
        self.bookings.insert(booking.clone()).await?;
        Ok(booking)
    }

    async fn compensate(&self, trip_id: Uuid, seats: u32) {
        if let Err(e) = self.capacity.hand_back(trip_id, seats).await {
            error!(%trip_id, seats, error = %e, "failed to hand back reserved seats");
        }
    }

    pub async fn get_booking(&self, booking_id: Uuid) -> Result<Booking> {
        self.bookings
            .get(booking_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Booking", booking_id))
    }

    pub async fn bookings_for_trip(&self, trip_id: Uuid) -> Result<Vec<Booking>> {
        self.bookings.for_trip(trip_id).await
    }

    pub async fn bookings_by_rider(&self, rider_id: &str) -> Result<Vec<Booking>> {
        self.bookings.for_rider(rider_id).await
    }

    /// Cancels a pending booking and hands its seats back to the trip.
    ///
    /// The cancellation is committed first, so a failed seat write is retried
    /// rather than leaving the seats held by a booking that no longer exists.
    pub async fn cancel_booking(&self, booking_id: Uuid) -> Result<Booking> {
        let booking = self.bookings.cancel(booking_id).await?;
        if let Err(e) = self
            .capacity
            .hand_back(booking.trip_id, booking.seats_booked)
            .await
        {
            error!(
                %booking_id,
                trip_id = %booking.trip_id,
                seats = booking.seats_booked,
                error = %e,
                "booking cancelled but its seats were not handed back"
            );
            return Err(e);
        }
        info!(%booking_id, seats = booking.seats_booked, "booking cancelled");
        Ok(booking)
    }

    /// Changes a trip's status; completing a trip completes its confirmed bookings.
    ///
    /// Requesting the current status of a live trip changes nothing.
    pub async fn update_trip_status(&self, trip_id: Uuid, status: TripStatus) -> Result<TripTransition> {
        let current = self.get_trip(trip_id).await?;
        if current.status == status && !status.is_terminal() {
            return Ok(TripTransition {
                trip: current,
                completed: Vec::new(),
            });
        }

        let (before, trip) = self.capacity.transition(trip_id, status).await?;
        if status != TripStatus::Completed {
            info!(%trip_id, from = %before.status, to = %status, "trip status changed");
            return Ok(TripTransition {
                trip,
                completed: Vec::new(),
            });
        }

        match self.bookings.complete_confirmed(trip_id).await {
            Ok(completed) => {
                info!(%trip_id, bookings = completed.len(), "trip completed");
                Ok(TripTransition { trip, completed })
            }
            Err(e) => {
                warn!(%trip_id, error = %e, "booking cascade failed, restoring trip status");
                if let Err(restore) = self.capacity.restore_status(trip_id, before.status).await {
                    error!(%trip_id, error = %restore, "failed to restore trip status");
                }
                Err(e)
            }
        }
    }

    /// Bookings on a trip currently in `status`.
    pub(crate) async fn bookings_in(&self, trip_id: Uuid, status: BookingStatus) -> Result<Vec<Booking>> {
        let bookings = self.bookings.for_trip(trip_id).await?;
        Ok(bookings.into_iter().filter(|b| b.status == status).collect())
    }
}
