use crate::error::EngineError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Cancelled seats no longer count against the trip's capacity.
    pub fn holds_seats(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(EngineError::ValidationError(format!(
                "Invalid booking status: {other}"
            ))),
        }
    }
}

/// A rider's claim on seats of a trip.
///
/// The fare is computed once when the booking is created and never recomputed,
/// even if the trip's pricing changes afterwards.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Booking {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub rider_id: String,
    pub seats_booked: u32,
    pub total_fare: Decimal,
    pub payment_tx_id: Option<String>,
    /// Custodial account the rider pays into, when settling through escrow.
    pub escrow_address: Option<String>,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn new(trip_id: Uuid, rider_id: String, seats_booked: u32, total_fare: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            trip_id,
            rider_id,
            seats_booked,
            total_fare,
            payment_tx_id: None,
            escrow_address: None,
            status: BookingStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Pending → Confirmed, attaching the settling transaction.
    pub fn confirm(&mut self, tx_id: &str) -> Result<(), EngineError> {
        match self.status {
            BookingStatus::Pending => {
                self.payment_tx_id = Some(tx_id.to_string());
                self.touch(BookingStatus::Confirmed);
                Ok(())
            }
            BookingStatus::Confirmed => Err(EngineError::AlreadyConfirmed(self.id)),
            other => Err(self.invalid_transition(other, BookingStatus::Confirmed)),
        }
    }

    /// Confirmed → Completed, driven by the trip completing.
    pub fn complete(&mut self) -> Result<(), EngineError> {
        if self.status != BookingStatus::Confirmed {
            return Err(self.invalid_transition(self.status, BookingStatus::Completed));
        }
        self.touch(BookingStatus::Completed);
        Ok(())
    }

    /// Pending → Cancelled. Paid bookings are not cancellable since refunds are not supported.
    pub fn cancel(&mut self) -> Result<(), EngineError> {
        if self.status != BookingStatus::Pending {
            return Err(self.invalid_transition(self.status, BookingStatus::Cancelled));
        }
        self.touch(BookingStatus::Cancelled);
        Ok(())
    }

    fn touch(&mut self, status: BookingStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    fn invalid_transition(&self, from: BookingStatus, to: BookingStatus) -> EngineError {
        EngineError::InvalidState(format!(
            "Booking {} cannot move from {} to {}",
            self.id, from, to
        ))
    }
}
