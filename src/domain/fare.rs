//! Deterministic fare computation and ledger unit conversion.

use super::trip::{Pricing, Trip};
use crate::error::EngineError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fractional digits kept on a fare, matching the ledger's smallest unit.
pub const FARE_PRECISION: u32 = 6;

/// Pricing model a deployment accepts for new trips.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum FareModel {
    Flat,
    #[default]
    PerDistanceUnit,
}

impl FareModel {
    pub fn matches(&self, pricing: &Pricing) -> bool {
        matches!(
            (self, pricing),
            (Self::Flat, Pricing::Flat { .. })
                | (Self::PerDistanceUnit, Pricing::PerDistanceUnit { .. })
        )
    }

    /// Builds the pricing for this model from a single configured rate.
    pub fn pricing(&self, rate: Decimal) -> Pricing {
        match self {
            Self::Flat => Pricing::Flat { price: rate },
            Self::PerDistanceUnit => Pricing::PerDistanceUnit { unit_price: rate },
        }
    }
}

impl fmt::Display for FareModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat => f.write_str("flat"),
            Self::PerDistanceUnit => f.write_str("per_distance_unit"),
        }
    }
}

impl FromStr for FareModel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "flat" => Ok(Self::Flat),
            "per_distance_unit" | "per_distance" => Ok(Self::PerDistanceUnit),
            other => Err(EngineError::ValidationError(format!(
                "Unknown fare model: {other}"
            ))),
        }
    }
}

/// Total fare for `seats` seats on `trip`, rounded to [`FARE_PRECISION`] digits.
///
/// Pure: the same trip state and seat count always produce the same amount.
/// A product too large for a `Decimal` is a validation error.
pub fn fare(trip: &Trip, seats: u32) -> Result<Decimal, EngineError> {
    let seats = Decimal::from(seats);
    let raw = match trip.pricing {
        Pricing::Flat { price } => price.checked_mul(seats),
        Pricing::PerDistanceUnit { unit_price } => trip
            .distance
            .checked_mul(unit_price)
            .and_then(|per_seat| per_seat.checked_mul(seats)),
    };
    raw.map(|amount| {
        amount.round_dp_with_strategy(FARE_PRECISION, RoundingStrategy::MidpointAwayFromZero)
    })
    .ok_or_else(|| {
        EngineError::ValidationError(format!(
            "Fare for {seats} seats on trip {} is out of range",
            trip.id
        ))
    })
}

/// Converts a major-unit amount to the ledger's minor units, truncating any remainder.
pub fn to_minor_units(amount: Decimal, minor_units_per_major: u64) -> Result<u64, EngineError> {
    amount
        .checked_mul(Decimal::from(minor_units_per_major))
        .and_then(|minor| minor.floor().to_u64())
        .ok_or_else(|| {
            EngineError::ValidationError(format!(
                "Amount {amount} cannot be expressed in ledger units"
            ))
        })
}

/// Inverse of [`to_minor_units`]. `minor_units_per_major` must be non-zero, which
/// [`crate::config::EngineConfig::validate`] guarantees.
pub fn from_minor_units(amount: u64, minor_units_per_major: u64) -> Decimal {
    Decimal::from(amount)
        .checked_div(Decimal::from(minor_units_per_major))
        .unwrap_or(Decimal::ZERO)
        .normalize()
}
