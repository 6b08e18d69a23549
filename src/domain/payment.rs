use crate::error::EngineError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Funds sit in a custodial escrow account.
    Escrow,
    /// A payout out of escrow is in flight.
    Releasing,
    /// Funds reached the driver directly and were verified.
    Completed,
    /// Escrowed funds were paid out to the driver.
    Released,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Escrow => "escrow",
            Self::Releasing => "releasing",
            Self::Completed => "completed",
            Self::Released => "released",
        };
        f.write_str(s)
    }
}

/// Evidence that a booking was paid. Append-only apart from the payout of escrow.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub payer_id: String,
    pub tx_id: String,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub verified_on_chain: bool,
    pub release_tx_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn new(
        booking_id: Uuid,
        payer_id: String,
        tx_id: String,
        amount: Decimal,
        status: PaymentStatus,
        verified_on_chain: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id,
            payer_id,
            tx_id,
            amount,
            status,
            verified_on_chain,
            release_tx_id: None,
            created_at: Utc::now(),
        }
    }

    /// Compare-and-set on the status along `escrow → releasing → released`.
    ///
    /// A failed payout moves back from `releasing` to `escrow`, and a payout made
    /// by hand goes straight from `escrow` to `released`. `release_tx_id` is kept
    /// only when the payment ends up released.
    pub fn advance(
        &mut self,
        expected: PaymentStatus,
        next: PaymentStatus,
        release_tx_id: Option<String>,
    ) -> Result<(), EngineError> {
        use PaymentStatus::{Escrow, Released, Releasing};

        if self.status != expected {
            return Err(EngineError::InvalidState(format!(
                "Payment {} is {}, expected {expected}",
                self.id, self.status
            )));
        }
        if !matches!(
            (expected, next),
            (Escrow, Releasing) | (Releasing, Released) | (Releasing, Escrow) | (Escrow, Released)
        ) {
            return Err(EngineError::InvalidState(format!(
                "Payment {} cannot move from {expected} to {next}",
                self.id
            )));
        }
        self.status = next;
        if next == Released {
            self.release_tx_id = release_tx_id;
        }
        Ok(())
    }
}

/// What a rider asserts about a payment they made.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PaymentClaim {
    pub tx_id: String,
    /// Amount the client reports sending. Only consulted by escrow initiation.
    #[serde(default)]
    pub amount: Option<Decimal>,
}

impl PaymentClaim {
    pub fn new(tx_id: impl Into<String>) -> Self {
        Self {
            tx_id: tx_id.into(),
            amount: None,
        }
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }
}

/// The rule set that decides when a booking counts as paid.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum SettlementPolicy {
    /// The rider pays the driver; the transaction is verified on the ledger.
    #[default]
    Direct,
    /// The rider pays a custodial escrow account and the claim is trusted.
    /// Weaker: nothing is checked against the ledger before confirming.
    Escrow,
}

impl fmt::Display for SettlementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Escrow => f.write_str("escrow"),
        }
    }
}

impl FromStr for SettlementPolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "escrow" => Ok(Self::Escrow),
            other => Err(EngineError::ValidationError(format!(
                "Unknown settlement policy: {other}"
            ))),
        }
    }
}
