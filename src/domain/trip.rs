use crate::error::EngineError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Active,
    InProgress,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled trips never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TripStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(EngineError::ValidationError(format!(
                "Invalid trip status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Location {
    pub name: String,
    pub coordinates: Option<Coordinates>,
}

impl Location {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            coordinates: None,
        }
    }
}

/// How a trip prices its seats. Chosen when the trip is created.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum Pricing {
    /// A fixed price per seat.
    Flat { price: Decimal },
    /// A rate per unit of trip distance, per seat.
    PerDistanceUnit { unit_price: Decimal },
}

/// A scheduled trip offering a fixed number of seats.
///
/// `seats_available` is only ever changed through a versioned compare-and-swap,
/// see [`crate::application::capacity::TripCapacityLedger`].
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Trip {
    pub id: Uuid,
    pub driver_id: String,
    pub origin: Location,
    pub destination: Location,
    pub distance: Decimal,
    pub pricing: Pricing,
    pub total_seats: u32,
    pub seats_available: u32,
    pub status: TripStatus,
    pub departure_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Incremented on every persisted change.
    pub version: u64,
}

/// Fields a driver supplies to publish a trip.
#[derive(Debug, Deserialize, Clone)]
pub struct NewTrip {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub driver_id: String,
    pub origin: Location,
    pub destination: Location,
    #[serde(default)]
    pub distance: Decimal,
    pub pricing: Pricing,
    pub seats: u32,
    #[serde(default)]
    pub departure_time: Option<DateTime<Utc>>,
}

impl Trip {
    pub fn new(new_trip: NewTrip) -> Self {
        Self {
            id: new_trip.id.unwrap_or_else(Uuid::new_v4),
            driver_id: new_trip.driver_id,
            origin: new_trip.origin,
            destination: new_trip.destination,
            distance: new_trip.distance,
            pricing: new_trip.pricing,
            total_seats: new_trip.seats,
            seats_available: new_trip.seats,
            status: TripStatus::Active,
            departure_time: new_trip.departure_time,
            created_at: Utc::now(),
            version: 0,
        }
    }

    /// Takes `seats` out of the available pool.
    pub fn reserve(&mut self, seats: u32) -> Result<(), EngineError> {
        if self.status != TripStatus::Active {
            return Err(EngineError::InvalidState(format!(
                "Trip {} is {}, not active",
                self.id, self.status
            )));
        }
        if seats > self.seats_available {
            return Err(EngineError::InsufficientCapacity {
                requested: seats,
                available: self.seats_available,
            });
        }
        self.seats_available -= seats;
        Ok(())
    }

    /// Returns `seats` to the pool, never exceeding the trip's capacity.
    pub fn release(&mut self, seats: u32) {
        self.seats_available = self
            .seats_available
            .saturating_add(seats)
            .min(self.total_seats);
    }

    /// Bookings can only be paid while the trip is still live; a finished trip has
    /// already completed or released everything it will.
    pub fn ensure_payable(&self) -> Result<(), EngineError> {
        if self.status.is_terminal() {
            return Err(EngineError::InvalidState(format!(
                "Trip {} is {} and no longer takes payments",
                self.id, self.status
            )));
        }
        Ok(())
    }

    pub fn seats_taken(&self) -> u32 {
        self.total_seats - self.seats_available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trip(seats: u32) -> Trip {
        Trip::new(NewTrip {
            id: None,
            driver_id: "driver".to_string(),
            origin: Location::named("Campus"),
            destination: Location::named("Station"),
            distance: dec!(10),
            pricing: Pricing::PerDistanceUnit {
                unit_price: dec!(0.01),
            },
            seats,
            departure_time: None,
        })
    }

    #[test]
    fn test_reserve_and_release() {
        let mut trip = trip(3);
        trip.reserve(2).unwrap();
        assert_eq!(trip.seats_available, 1);
        assert_eq!(trip.seats_taken(), 2);

        trip.release(5);
        assert_eq!(trip.seats_available, 3);
    }

    #[test]
    fn test_reserve_insufficient() {
        let mut trip = trip(1);
        let result = trip.reserve(2);
        assert!(matches!(
            result,
            Err(EngineError::InsufficientCapacity {
                requested: 2,
                available: 1
            })
        ));
        assert_eq!(trip.seats_available, 1);
    }

    #[test]
    fn test_reserve_inactive_trip() {
        let mut trip = trip(3);
        trip.status = TripStatus::InProgress;
        assert!(matches!(trip.reserve(1), Err(EngineError::InvalidState(_))));
    }

    #[test]
    fn test_finished_trip_takes_no_payments() {
        let mut trip = trip(3);
        trip.status = TripStatus::InProgress;
        assert!(trip.ensure_payable().is_ok());
        for status in [TripStatus::Completed, TripStatus::Cancelled] {
            trip.status = status;
            assert!(matches!(trip.ensure_payable(), Err(EngineError::InvalidState(_))));
        }
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("in_progress".parse::<TripStatus>().unwrap(), TripStatus::InProgress);
        assert_eq!(" Completed ".parse::<TripStatus>().unwrap(), TripStatus::Completed);
        assert!(matches!(
            "finished".parse::<TripStatus>(),
            Err(EngineError::ValidationError(_))
        ));
    }

    #[test]
    fn test_pricing_serialization() {
        let json = serde_json::to_value(Pricing::Flat { price: dec!(2.5) }).unwrap();
        assert_eq!(json["model"], "flat");
    }
}
