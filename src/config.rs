//! Deployment configuration.
//!
//! Every field has a default, so an empty JSON object is a valid configuration.
//! The binary loads an optional file and then applies command-line overrides.

use crate::application::retry::RetryPolicy;
use crate::domain::fare::FareModel;
use crate::domain::payment::SettlementPolicy;
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub fare: FareConfig,
    pub settlement: SettlementConfig,
    pub capacity: CapacityConfig,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct FareConfig {
    pub model: FareModel,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SettlementConfig {
    pub policy: SettlementPolicy,
    /// Ledger minor units in one major display unit.
    pub minor_units_per_major: u64,
    /// Fraction of the expected amount a payment may fall short by.
    pub amount_tolerance: Decimal,
    pub lookup_retry: RetryPolicy,
    /// Rounds to wait for an escrow release to be confirmed.
    pub escrow_max_rounds: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            policy: SettlementPolicy::Direct,
            minor_units_per_major: 1_000_000,
            amount_tolerance: dec!(0.01),
            lookup_retry: RetryPolicy::default(),
            escrow_max_rounds: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CapacityConfig {
    /// Compare-and-swap attempts before a seat update gives up.
    pub max_attempts: u32,
    /// Backoff for handing seats back after their booking was already released.
    pub release_retry: RetryPolicy,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            max_attempts: 64,
            release_retry: RetryPolicy {
                max_attempts: 8,
                initial_backoff_ms: 10,
                max_backoff_ms: 500,
                multiplier: 2.0,
            },
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let settlement = &self.settlement;
        if settlement.minor_units_per_major == 0 {
            return Err(invalid("settlement.minor_units_per_major must be positive"));
        }
        if settlement.amount_tolerance < Decimal::ZERO || settlement.amount_tolerance >= Decimal::ONE {
            return Err(invalid(format!(
                "settlement.amount_tolerance must be in [0, 1), got {}",
                settlement.amount_tolerance
            )));
        }
        check_retry("settlement.lookup_retry", &settlement.lookup_retry)?;
        if self.capacity.max_attempts == 0 {
            return Err(invalid("capacity.max_attempts must be positive"));
        }
        check_retry("capacity.release_retry", &self.capacity.release_retry)
    }
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::ValidationError(format!("Invalid configuration: {}", message.into()))
}

fn check_retry(name: &str, policy: &RetryPolicy) -> Result<()> {
    if policy.max_attempts == 0 {
        return Err(invalid(format!("{name}.max_attempts must be positive")));
    }
    if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
        return Err(invalid(format!(
            "{name}.multiplier must be a finite number of at least 1, got {}",
            policy.multiplier
        )));
    }
    if policy.initial_backoff_ms > policy.max_backoff_ms {
        return Err(invalid(format!(
            "{name}.initial_backoff_ms exceeds max_backoff_ms"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.settlement.minor_units_per_major, 1_000_000);
        assert_eq!(config.settlement.amount_tolerance, dec!(0.01));
        assert_eq!(config.fare.model, FareModel::PerDistanceUnit);
    }

    #[test]
    fn test_partial_override() {
        let config = EngineConfig::from_json(
            r#"{
                "fare": { "model": "flat" },
                "settlement": { "policy": "escrow", "amount_tolerance": "0.005" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.fare.model, FareModel::Flat);
        assert_eq!(config.settlement.policy, SettlementPolicy::Escrow);
        assert_eq!(config.settlement.amount_tolerance, dec!(0.005));
        assert_eq!(config.settlement.escrow_max_rounds, 10);
    }

    #[test]
    fn test_zero_minor_units_rejected() {
        let result = EngineConfig::from_json(r#"{"settlement": {"minor_units_per_major": 0}}"#);
        assert!(matches!(result, Err(EngineError::ValidationError(_))));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        for json in [
            r#"{"settlement": {"amount_tolerance": "1"}}"#,
            r#"{"settlement": {"amount_tolerance": "-0.01"}}"#,
            r#"{"settlement": {"lookup_retry": {"max_attempts": 0}}}"#,
            r#"{"settlement": {"lookup_retry": {"multiplier": 0.5}}}"#,
            r#"{"capacity": {"max_attempts": 0}}"#,
            r#"{"capacity": {"release_retry": {"initial_backoff_ms": 900, "max_backoff_ms": 100}}}"#,
        ] {
            let result = EngineConfig::from_json(json);
            assert!(
                matches!(result, Err(EngineError::ValidationError(_))),
                "accepted {json}"
            );
        }
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_unknown_policy_rejected() {
        assert!(EngineConfig::from_json(r#"{"settlement": {"policy": "trust"}}"#).is_err());
    }
}
