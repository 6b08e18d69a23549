use clap::Parser;
use miette::{IntoDiagnostic, Result};
use rideshare_engine::application::engine::{EnginePorts, RideShareEngine};
use rideshare_engine::config::EngineConfig;
use rideshare_engine::domain::fare::FareModel;
use rideshare_engine::domain::payment::SettlementPolicy;
use rideshare_engine::domain::ports::{
    BookingStore, BookingStoreRef, PaymentStore, PaymentStoreRef, TripStore, TripStoreRef,
};
use rideshare_engine::infrastructure::in_memory::{InMemoryStore, InMemoryWalletDirectory};
#[cfg(feature = "storage-rocksdb")]
use rideshare_engine::infrastructure::rocksdb::RocksDBStore;
use rideshare_engine::infrastructure::simulated_ledger::SimulatedLedger;
use rideshare_engine::interfaces::csv::command_reader::CommandReader;
use rideshare_engine::interfaces::csv::report_writer::ReportWriter;
use rideshare_engine::interfaces::script::ScriptRunner;
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Command script CSV file
    script: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Settlement policy: direct or escrow
    #[arg(long)]
    policy: Option<SettlementPolicy>,

    /// Fare model accepted for new trips: flat or per-distance-unit
    #[arg(long)]
    fare_model: Option<FareModel>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rideshare_engine=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path).into_diagnostic()?,
        None => EngineConfig::default(),
    };
    if let Some(policy) = cli.policy {
        config.settlement.policy = policy;
    }
    if let Some(model) = cli.fare_model {
        config.fare.model = model;
    }
    Ok(config)
}

struct Stores {
    trips: TripStoreRef,
    bookings: BookingStoreRef,
    payments: PaymentStoreRef,
    persistent: bool,
}

fn shared<S>(store: S, persistent: bool) -> Stores
where
    S: TripStore + BookingStore + PaymentStore + 'static,
{
    let store = Arc::new(store);
    let trips: TripStoreRef = store.clone();
    let bookings: BookingStoreRef = store.clone();
    let payments: PaymentStoreRef = store;
    Stores {
        trips,
        bookings,
        payments,
        persistent,
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<&Path>) -> Result<Stores> {
    match db_path {
        Some(path) => Ok(shared(RocksDBStore::open(path).into_diagnostic()?, true)),
        None => Ok(shared(InMemoryStore::new(), false)),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<&Path>) -> Result<Stores> {
    if db_path.is_some() {
        warn!(
            "Persistent storage requested via --db-path, but the 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
        );
    }
    Ok(shared(InMemoryStore::new(), false))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let stores = open_stores(cli.db_path.as_deref())?;
    let ledger = SimulatedLedger::new();
    let wallets = InMemoryWalletDirectory::new();

    info!(
        policy = %config.settlement.policy,
        fare_model = %config.fare.model,
        persistent = stores.persistent,
        "engine starting"
    );
    let engine = RideShareEngine::new(
        config,
        EnginePorts {
            trips: stores.trips,
            bookings: stores.bookings,
            payments: stores.payments,
            wallets: Arc::new(wallets.clone()),
            ledger: Arc::new(ledger.clone()),
        },
    )
    .into_diagnostic()?;

    // Run the script
    let file = File::open(&cli.script).into_diagnostic()?;
    let mut runner = ScriptRunner::new(&engine, ledger, wallets);
    for (index, record) in CommandReader::new(file).commands().enumerate() {
        let row = index + 2;
        match record {
            Ok(record) => {
                if let Err(e) = runner.execute(&record).await {
                    warn!(row, command = %record.command, kind = %e.kind(), "command failed: {e}");
                }
            }
            Err(e) => {
                warn!(row, "malformed command row: {e}");
            }
        }
    }

    let trips = engine.all_trips().await.into_diagnostic()?;
    let bookings = engine.all_bookings().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());
    writer.write_report(&trips, &bookings).into_diagnostic()?;

    Ok(())
}
