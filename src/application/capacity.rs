//! Seat inventory and trip status, mutated only through versioned compare-and-swap.

use crate::application::retry::{Attempt, RetryPolicy};
use crate::config::CapacityConfig;
use crate::domain::ports::TripStoreRef;
use crate::domain::trip::{Trip, TripStatus};
use crate::error::{EngineError, Result};
use tracing::{debug, warn};
use uuid::Uuid;

/// Owns every write to a trip's `seats_available` and `status`.
///
/// Each change reads the trip, applies the change locally and commits it only if
/// the stored version is unchanged, re-reading on conflict. Concurrent callers
/// therefore observe a single serial order per trip and can never oversell.
pub struct TripCapacityLedger {
    trips: TripStoreRef,
    max_attempts: u32,
    release_retry: RetryPolicy,
}

impl TripCapacityLedger {
    pub fn new(trips: TripStoreRef, config: &CapacityConfig) -> Self {
        Self {
            trips,
            max_attempts: config.max_attempts.max(1),
            release_retry: config.release_retry.clone(),
        }
    }

    /// Takes `seats` from the trip and returns the snapshot read before the change.
    pub async fn reserve(&self, trip_id: Uuid, seats: u32) -> Result<Trip> {
        let (before, _) = self.update(trip_id, |trip| trip.reserve(seats)).await?;
        Ok(before)
    }

    /// Gives `seats` back, clamped to the trip's capacity.
    pub async fn release(&self, trip_id: Uuid, seats: u32) -> Result<Trip> {
        let (_, after) = self
            .update(trip_id, |trip| {
                trip.release(seats);
                Ok(())
            })
            .await?;
        Ok(after)
    }

    /// Gives back seats whose booking is already gone, retrying failed writes.
    ///
    /// Only a missing trip fails at once; any other error is retried with backoff
    /// and surfaces as `Contention` once the retries run out.
    pub async fn hand_back(&self, trip_id: Uuid, seats: u32) -> Result<Trip> {
        self.release_retry
            .run(move || async move {
                match self.release(trip_id, seats).await {
                    Ok(trip) => Ok(Attempt::Done(trip)),
                    Err(e @ EngineError::NotFound { .. }) => Err(e),
                    Err(e) => {
                        warn!(%trip_id, seats, error = %e, "seat release failed, retrying");
                        Ok(Attempt::Retry)
                    }
                }
            })
            .await?
            .ok_or_else(|| EngineError::Contention(format!("seat release on trip {trip_id}")))
    }

    /// Moves a non-terminal trip to `status`. Returns the trips before and after.
    pub async fn transition(&self, trip_id: Uuid, status: TripStatus) -> Result<(Trip, Trip)> {
        self.update(trip_id, |trip| {
            if trip.status.is_terminal() {
                return Err(EngineError::InvalidState(format!(
                    "Trip {} is already {}",
                    trip.id, trip.status
                )));
            }
            trip.status = status;
            Ok(())
        })
        .await
    }

    /// Puts back a status overwritten by a transition whose follow-up failed.
    pub async fn restore_status(&self, trip_id: Uuid, status: TripStatus) -> Result<Trip> {
        let (_, after) = self
            .update(trip_id, |trip| {
                trip.status = status;
                Ok(())
            })
            .await?;
        Ok(after)
    }

    async fn update<F>(&self, trip_id: Uuid, mut apply: F) -> Result<(Trip, Trip)>
    where
        F: FnMut(&mut Trip) -> Result<()>,
    {
        for attempt in 1..=self.max_attempts {
            let before = self
                .trips
                .get(trip_id)
                .await?
                .ok_or_else(|| EngineError::not_found("Trip", trip_id))?;

            let mut after = before.clone();
            apply(&mut after)?;

            if self
                .trips
                .compare_and_swap(after.clone(), before.version)
                .await?
            {
                after.version = before.version + 1;
                return Ok((before, after));
            }
            debug!(%trip_id, attempt, "trip version moved, retrying");
            tokio::task::yield_now().await;
        }
        Err(EngineError::Contention(format!("trip {trip_id}")))
    }
}
