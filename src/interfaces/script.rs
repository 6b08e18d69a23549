//! Drives the engine from a command script against the simulated ledger.

use crate::application::bookings::BookingRequest;
use crate::application::engine::RideShareEngine;
use crate::domain::booking::BookingStatus;
use crate::domain::fare::to_minor_units;
use crate::domain::payment::PaymentClaim;
use crate::domain::ports::LedgerGateway;
use crate::domain::trip::{Location, NewTrip, TripStatus};
use crate::error::{EngineError, Result};
use crate::infrastructure::in_memory::InMemoryWalletDirectory;
use crate::infrastructure::simulated_ledger::{SimulatedAccount, SimulatedLedger};
use crate::interfaces::csv::command_reader::{CommandKind, CommandRecord};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

/// Stable id for a script label, so reruns against a database address the same rows.
pub fn label_id(kind: &str, label: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("rideshare:{kind}:{label}").as_bytes())
}

/// Executes script commands one at a time.
///
/// Wallet keys and transaction labels live only for the run.
pub struct ScriptRunner<'a> {
    engine: &'a RideShareEngine,
    ledger: SimulatedLedger,
    wallets: InMemoryWalletDirectory,
    accounts: HashMap<String, SimulatedAccount>,
    transactions: HashMap<String, String>,
}

impl<'a> ScriptRunner<'a> {
    pub fn new(
        engine: &'a RideShareEngine,
        ledger: SimulatedLedger,
        wallets: InMemoryWalletDirectory,
    ) -> Self {
        Self {
            engine,
            ledger,
            wallets,
            accounts: HashMap::new(),
            transactions: HashMap::new(),
        }
    }

    pub async fn execute(&mut self, record: &CommandRecord) -> Result<()> {
        match record.command {
            CommandKind::Wallet => self.open_wallet(record).await,
            CommandKind::Fund => self.fund(record).await,
            CommandKind::Trip => self.publish_trip(record).await,
            CommandKind::Book => self.book(record).await,
            CommandKind::Pay => self.pay(record).await,
            CommandKind::Confirm => self.confirm(record).await,
            CommandKind::Cancel => {
                let booking_id = label_id("booking", record.target()?);
                self.engine
                    .update_booking_status(booking_id, BookingStatus::Cancelled, None)
                    .await?;
                Ok(())
            }
            CommandKind::TripStatus => {
                let trip_id = label_id("trip", record.target()?);
                let status: TripStatus = record.status()?.parse()?;
                let outcome = self.engine.update_trip_status(trip_id, status).await?;
                for failure in &outcome.escrow.failed {
                    info!(booking_id = %failure.booking_id, error = %failure.error, "escrow release pending");
                }
                Ok(())
            }
            CommandKind::Release => {
                let trip_id = label_id("trip", record.target()?);
                let report = self.engine.release_pending_escrow(trip_id).await?;
                info!(
                    %trip_id,
                    released = report.released.len(),
                    failed = report.failed.len(),
                    "escrow release retried"
                );
                Ok(())
            }
        }
    }

    fn minor_units(&self, amount: Decimal) -> Result<u64> {
        to_minor_units(amount, self.engine.config().settlement.minor_units_per_major)
    }

    fn account(&self, user: &str) -> Result<&SimulatedAccount> {
        self.accounts
            .get(user)
            .ok_or_else(|| EngineError::MissingWallet(user.to_string()))
    }

    async fn open_wallet(&mut self, record: &CommandRecord) -> Result<()> {
        let user = record.user()?;
        let account = self.ledger.create_account().await;
        self.wallets.register(user, account.address.clone()).await;
        info!(user, address = %account.address, "wallet opened");
        self.accounts.insert(user.to_string(), account);
        Ok(())
    }

    async fn fund(&self, record: &CommandRecord) -> Result<()> {
        let amount = self.minor_units(record.amount()?)?;
        let account = self.account(record.user()?)?;
        self.ledger.fund(&account.address, amount).await;
        Ok(())
    }

    async fn publish_trip(&self, record: &CommandRecord) -> Result<()> {
        let label = record.label()?;
        let rate = record.amount()?;
        let seats = record.seats.ok_or_else(|| {
            EngineError::ValidationError("`seats` is required for `trip`".to_string())
        })?;
        let model = self.engine.config().fare.model;
        self.engine
            .create_trip(NewTrip {
                id: Some(label_id("trip", label)),
                driver_id: record.user()?.to_string(),
                origin: Location::named(format!("{label} pickup")),
                destination: Location::named(format!("{label} dropoff")),
                distance: record.distance.unwrap_or(Decimal::ZERO),
                pricing: model.pricing(rate),
                seats,
                departure_time: None,
            })
            .await?;
        Ok(())
    }

    async fn book(&self, record: &CommandRecord) -> Result<()> {
        let request = BookingRequest {
            id: Some(label_id("booking", record.label()?)),
            trip_id: label_id("trip", record.target()?),
            rider_id: record.user()?.to_string(),
            seats: record.seats,
        };
        self.engine.create_booking(request).await?;
        Ok(())
    }

    /// Signs and submits a payment to whoever the booking must be paid to.
    async fn pay(&mut self, record: &CommandRecord) -> Result<()> {
        let target = record.target()?;
        let booking = self.engine.get_booking(label_id("booking", target)).await?;
        let amount = record.amount.unwrap_or(booking.total_fare);
        let payee = self.engine.payee_for(booking.id).await?;
        let account = self.account(record.user()?)?;

        let signed = self
            .engine
            .build_payment(&account.address, &payee, amount)
            .await?
            .sign(&account.key)?;
        let tx_id = self
            .ledger
            .submit_signed_transaction(&signed.to_bytes()?)
            .await?;
        let rounds = self.engine.config().settlement.escrow_max_rounds;
        self.ledger.await_confirmation(&tx_id, rounds).await?;

        info!(booking = target, %tx_id, %amount, "payment submitted");
        let label = record.tx.clone().unwrap_or_else(|| target.to_string());
        self.transactions.insert(label, tx_id);
        Ok(())
    }

    async fn confirm(&self, record: &CommandRecord) -> Result<()> {
        let target = record.target()?;
        let tx = record.tx.as_deref().unwrap_or(target);
        let tx_id = self
            .transactions
            .get(tx)
            .cloned()
            .unwrap_or_else(|| tx.to_string());
        let claim = PaymentClaim {
            tx_id,
            amount: record.amount,
        };
        self.engine
            .confirm_payment(label_id("booking", target), claim)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::engine::EnginePorts;
    use crate::config::EngineConfig;
    use crate::domain::payment::SettlementPolicy;
    use crate::domain::ports::WalletDirectory;
    use crate::infrastructure::in_memory::InMemoryStore;
    use crate::interfaces::csv::command_reader::CommandReader;
    use std::sync::Arc;

    fn engine(policy: SettlementPolicy) -> (RideShareEngine, SimulatedLedger, InMemoryWalletDirectory) {
        let store = Arc::new(InMemoryStore::new());
        let ledger = SimulatedLedger::new();
        let wallets = InMemoryWalletDirectory::new();
        let mut config = EngineConfig::default();
        config.settlement.policy = policy;
        let engine = RideShareEngine::new(
            config,
            EnginePorts {
                trips: store.clone(),
                bookings: store.clone(),
                payments: store,
                wallets: Arc::new(wallets.clone()),
                ledger: Arc::new(ledger.clone()),
            },
        )
        .unwrap();
        (engine, ledger, wallets)
    }

    async fn run(runner: &mut ScriptRunner<'_>, script: &str) -> Vec<Result<()>> {
        let mut results = Vec::new();
        for record in CommandReader::new(script.as_bytes()).commands() {
            results.push(runner.execute(&record.unwrap()).await);
        }
        results
    }

    const HEADER: &str = "command,ref,target,user,seats,amount,distance,status,tx\n";

    #[test]
    fn test_label_ids_are_stable() {
        assert_eq!(label_id("trip", "t1"), label_id("trip", "t1"));
        assert_ne!(label_id("trip", "t1"), label_id("booking", "t1"));
    }

    #[tokio::test]
    async fn test_direct_script() {
        let (engine, ledger, wallets) = engine(SettlementPolicy::Direct);
        let mut runner = ScriptRunner::new(&engine, ledger, wallets);
        let script = format!(
            "{HEADER}\
             wallet,,,dana\n\
             wallet,,,riley\n\
             fund,,,riley,,5\n\
             trip,t1,,dana,3,0.01,10\n\
             book,b1,t1,riley,2\n\
             pay,,b1,riley,,,,,p1\n\
             confirm,,b1,,,,,,p1\n"
        );
        let results = run(&mut runner, &script).await;
        assert!(results.iter().all(|r| r.is_ok()), "{results:?}");

        let booking = engine.get_booking(label_id("booking", "b1")).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        let trip = engine.get_trip(label_id("trip", "t1")).await.unwrap();
        assert_eq!(trip.seats_available, 1);
    }

    #[tokio::test]
    async fn test_escrow_script_pays_driver_on_completion() {
        let (engine, ledger, wallets) = engine(SettlementPolicy::Escrow);
        let mut runner = ScriptRunner::new(&engine, ledger.clone(), wallets.clone());
        let script = format!(
            "{HEADER}\
             wallet,,,dana\n\
             wallet,,,riley\n\
             fund,,,riley,,5\n\
             trip,t1,,dana,3,0.01,10\n\
             book,b1,t1,riley,2\n\
             pay,,b1,riley\n\
             confirm,,b1,,,0.2\n\
             trip-status,,t1,,,,,completed\n"
        );
        let results = run(&mut runner, &script).await;
        assert!(results.iter().all(|r| r.is_ok()), "{results:?}");

        let driver = wallets.wallet_address("dana").await.unwrap().unwrap();
        assert_eq!(ledger.account_balance(&driver).await.unwrap(), 200_000);
        let booking = engine.get_booking(label_id("booking", "b1")).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Completed);
    }

    #[tokio::test]
    async fn test_failed_command_reports_error() {
        let (engine, ledger, wallets) = engine(SettlementPolicy::Direct);
        let mut runner = ScriptRunner::new(&engine, ledger, wallets);
        let script = format!("{HEADER}fund,,,ghost,,1\nbook,b1,missing,riley,1\n");
        let results = run(&mut runner, &script).await;
        assert!(matches!(results[0], Err(EngineError::MissingWallet(_))));
        assert!(matches!(results[1], Err(EngineError::NotFound { .. })));
    }
}
