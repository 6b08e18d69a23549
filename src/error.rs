use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Every failure the engine can report.
///
/// Each variant maps to a stable [`ErrorKind`] that callers can match on, and to an
/// [`ErrorClass`] describing whether a retry can help.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Insufficient capacity: requested {requested} seats, only {available} available")]
    InsufficientCapacity { requested: u32, available: u32 },
    #[error("Driver cannot book own trip")]
    SelfBooking,
    #[error("Booking {0} is already confirmed")]
    AlreadyConfirmed(Uuid),
    #[error("No wallet address registered for driver {0}")]
    MissingWallet(String),
    #[error("Transaction {0} not found on the ledger yet, retry later")]
    TxNotFound(String),
    #[error("Transaction {tx_id} is of type {actual}, expected a payment")]
    WrongTxType { tx_id: String, actual: String },
    #[error("Transaction receiver {actual} does not match driver wallet {expected}")]
    ReceiverMismatch { expected: String, actual: String },
    #[error("Insufficient amount: expected {expected}, received {actual}")]
    InsufficientAmount { expected: Decimal, actual: Decimal },
    #[error("Transaction {0} already settled another booking")]
    TxAlreadyUsed(String),
    #[error("Transaction {tx_id} not confirmed after {rounds} rounds")]
    ConfirmationTimeout { tx_id: String, rounds: u64 },
    #[error("Concurrent updates on {0} exhausted the retry budget")]
    Contention(String),
    #[error("Ledger error: {0}")]
    Ledger(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Machine-checkable error discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidState,
    InsufficientCapacity,
    SelfBooking,
    AlreadyConfirmed,
    MissingWallet,
    TxNotFound,
    WrongTxType,
    ReceiverMismatch,
    InsufficientAmount,
    TxAlreadyUsed,
    ConfirmationTimeout,
    Contention,
    Ledger,
    Internal,
}

/// How a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed input, nothing was mutated.
    Validation,
    /// Current state forbids the operation; retry with corrected input.
    Conflict,
    /// External dependency not ready; retry the same request after a delay.
    Transient,
    /// Permanent for this ledger transaction; a new payment is required.
    Terminal,
    Internal,
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationError(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::InsufficientCapacity { .. } => ErrorKind::InsufficientCapacity,
            Self::SelfBooking => ErrorKind::SelfBooking,
            Self::AlreadyConfirmed(_) => ErrorKind::AlreadyConfirmed,
            Self::MissingWallet(_) => ErrorKind::MissingWallet,
            Self::TxNotFound(_) => ErrorKind::TxNotFound,
            Self::WrongTxType { .. } => ErrorKind::WrongTxType,
            Self::ReceiverMismatch { .. } => ErrorKind::ReceiverMismatch,
            Self::InsufficientAmount { .. } => ErrorKind::InsufficientAmount,
            Self::TxAlreadyUsed(_) => ErrorKind::TxAlreadyUsed,
            Self::ConfirmationTimeout { .. } => ErrorKind::ConfirmationTimeout,
            Self::Contention(_) => ErrorKind::Contention,
            Self::Ledger(_) => ErrorKind::Ledger,
            Self::CsvError(_) => ErrorKind::Validation,
            Self::Serialization(_) | Self::IoError(_) | Self::InternalError(_) => {
                ErrorKind::Internal
            }
            #[cfg(feature = "storage-rocksdb")]
            Self::Storage(_) => ErrorKind::Internal,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self.kind() {
            ErrorKind::Validation => ErrorClass::Validation,
            ErrorKind::NotFound
            | ErrorKind::InvalidState
            | ErrorKind::InsufficientCapacity
            | ErrorKind::SelfBooking
            | ErrorKind::AlreadyConfirmed
            | ErrorKind::MissingWallet => ErrorClass::Conflict,
            ErrorKind::TxNotFound
            | ErrorKind::ConfirmationTimeout
            | ErrorKind::Contention
            | ErrorKind::Ledger => ErrorClass::Transient,
            ErrorKind::WrongTxType
            | ErrorKind::ReceiverMismatch
            | ErrorKind::InsufficientAmount
            | ErrorKind::TxAlreadyUsed => ErrorClass::Terminal,
            ErrorKind::Internal => ErrorClass::Internal,
        }
    }

    /// Whether re-invoking the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            EngineError::TxNotFound("abc".into()).class(),
            ErrorClass::Transient
        );
        assert!(EngineError::Ledger("connection reset".into()).is_retryable());
        assert_eq!(
            EngineError::ReceiverMismatch {
                expected: "A".into(),
                actual: "B".into()
            }
            .class(),
            ErrorClass::Terminal
        );
        assert_eq!(
            EngineError::AlreadyConfirmed(Uuid::nil()).class(),
            ErrorClass::Conflict
        );
    }

    #[test]
    fn test_missing_wallet_clears_once_registered() {
        let err = EngineError::MissingWallet("driver-9".into());
        assert_eq!(err.class(), ErrorClass::Conflict);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_insufficient_amount_reports_both_amounts() {
        let err = EngineError::InsufficientAmount {
            expected: dec!(0.2),
            actual: dec!(0.1978),
        };
        let message = err.to_string();
        assert!(message.contains("0.2"));
        assert!(message.contains("0.1978"));
        assert_eq!(err.kind(), ErrorKind::InsufficientAmount);
    }
}
