#![allow(dead_code)]

use rideshare_engine::application::engine::{EnginePorts, RideShareEngine};
use rideshare_engine::config::EngineConfig;
use rideshare_engine::domain::payment::SettlementPolicy;
use rideshare_engine::domain::trip::{Location, NewTrip, Pricing, Trip};
use rideshare_engine::infrastructure::in_memory::{InMemoryStore, InMemoryWalletDirectory};
use rideshare_engine::infrastructure::simulated_ledger::{SimulatedAccount, SimulatedLedger};
use rust_decimal_macros::dec;
use std::io::{Error, Write};
use std::sync::Arc;
use tempfile::NamedTempFile;

pub const HEADER: &str = "command,ref,target,user,seats,amount,distance,status,tx";

/// Writes a command script with the standard header followed by `rows`.
pub fn script(rows: &[&str]) -> Result<NamedTempFile, Error> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, "{HEADER}")?;
    for row in rows {
        writeln!(file, "{row}")?;
    }
    file.flush()?;
    Ok(file)
}

pub struct Harness {
    pub engine: Arc<RideShareEngine>,
    pub ledger: SimulatedLedger,
    pub wallets: InMemoryWalletDirectory,
    pub driver: SimulatedAccount,
    pub rider: SimulatedAccount,
}

/// An engine over in-memory stores with a funded rider wallet and a driver wallet.
pub async fn harness(policy: SettlementPolicy) -> Harness {
    harness_with(policy, |_| {}).await
}

pub async fn harness_with(policy: SettlementPolicy, tweak: impl FnOnce(&mut EngineConfig)) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let wallets = InMemoryWalletDirectory::new();
    let ledger = SimulatedLedger::new();
    let driver = ledger.create_account().await;
    let rider = ledger.create_account().await;
    ledger.fund(&rider.address, 100_000_000).await;
    wallets.register("driver", driver.address.clone()).await;
    wallets.register("rider", rider.address.clone()).await;

    let mut config = EngineConfig::default();
    config.settlement.policy = policy;
    config.settlement.lookup_retry.max_attempts = 1;
    tweak(&mut config);

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
    Harness {
        engine: Arc::new(engine),
        ledger,
        wallets,
        driver,
        rider,
    }
}

impl Harness {
    /// A 10 unit trip at 0.01 per unit per seat, driven by `driver`.
    pub async fn trip(&self, seats: u32) -> Trip {
        self.engine
            .create_trip(NewTrip {
                id: None,
                driver_id: "driver".into(),
                origin: Location::named("North Campus"),
                destination: Location::named("Airport"),
                distance: dec!(10),
                pricing: Pricing::PerDistanceUnit {
                    unit_price: dec!(0.01),
                },
                seats,
                departure_time: None,
            })
            .await
            .unwrap()
    }
}
