use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fmt;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    /// Open a ledger wallet for `user`.
    Wallet,
    /// Mint `amount` into `user`'s wallet.
    Fund,
    /// Publish trip `ref` driven by `user`.
    Trip,
    /// Book `seats` on trip `target` for `user` as booking `ref`.
    Book,
    /// `user` pays for booking `target` on the ledger, remembered as `tx`.
    Pay,
    /// Claim payment `tx` for booking `target`.
    Confirm,
    Cancel,
    /// Move trip `target` to `status`.
    TripStatus,
    /// Retry escrow payouts for trip `target`.
    Release,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Wallet => "wallet",
            Self::Fund => "fund",
            Self::Trip => "trip",
            Self::Book => "book",
            Self::Pay => "pay",
            Self::Confirm => "confirm",
            Self::Cancel => "cancel",
            Self::TripStatus => "trip-status",
            Self::Release => "release",
        };
        f.write_str(s)
    }
}

/// One row of a command script. Which columns matter depends on the command.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CommandRecord {
    pub command: CommandKind,
    #[serde(default, rename = "ref")]
    pub label: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub seats: Option<u32>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub distance: Option<Decimal>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tx: Option<String>,
}

impl CommandRecord {
    fn required<'a>(&self, value: &'a Option<String>, column: &str) -> Result<&'a str> {
        value.as_deref().filter(|v| !v.is_empty()).ok_or_else(|| {
            EngineError::ValidationError(format!(
                "`{column}` is required for `{}`",
                self.command
            ))
        })
    }

    pub fn label(&self) -> Result<&str> {
        self.required(&self.label, "ref")
    }

    pub fn target(&self) -> Result<&str> {
        self.required(&self.target, "target")
    }

    pub fn user(&self) -> Result<&str> {
        self.required(&self.user, "user")
    }

    pub fn status(&self) -> Result<&str> {
        self.required(&self.status, "status")
    }

    pub fn amount(&self) -> Result<Decimal> {
        self.amount.ok_or_else(|| {
            EngineError::ValidationError(format!("`amount` is required for `{}`", self.command))
        })
    }
}

/// Reads command rows from a CSV source, trimming whitespace and tolerating
/// short rows.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes rows; a malformed row yields an error and reading continues.
    pub fn commands(self) -> impl Iterator<Item = Result<CommandRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(EngineError::from))
    }
}
