use clap::Parser;
use ledgerq::application::applier::TransactionApplier;
use ledgerq::application::gateway::{AdmissionGateway, Response};
use ledgerq::config::{DEFAULT_MAX_ATTEMPTS, PipelineConfig};
use ledgerq::domain::ports::{SharedLedgerStore, SharedQueue};
use ledgerq::infrastructure::in_memory::{InMemoryLedgerStore, InMemoryQueue};
#[cfg(feature = "storage-rocksdb")]
use ledgerq::infrastructure::rocksdb::RocksDBStore;
use ledgerq::interfaces::csv::account_writer::AccountWriter;
use ledgerq::interfaces::csv::request_reader::RequestReader;
use ledgerq::telemetry;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input CSV of transaction requests (id, type, amount, account_id, timestamp)
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Response budget for approving a withdraw_request, in milliseconds
    #[arg(long, default_value_t = 3000)]
    budget_ms: u64,

    /// Deliveries allowed per message before it is dead-lettered
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Keep the applier running alongside admission instead of settling the
    /// queue after every request
    #[arg(long)]
    concurrent: bool,
}

fn open_backends(
    db_path: Option<&Path>,
    config: &PipelineConfig,
) -> Result<(SharedLedgerStore, SharedQueue)> {
    #[cfg(feature = "storage-rocksdb")]
    if let Some(path) = db_path {
        let store = RocksDBStore::open(path, config.queue_name.clone()).into_diagnostic()?;
        let ledger: SharedLedgerStore = Arc::new(store.clone());
        let queue: SharedQueue = Arc::new(store);
        return Ok((ledger, queue));
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    if db_path.is_some() {
        warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
        );
    }

    let ledger: SharedLedgerStore = Arc::new(InMemoryLedgerStore::new());
    let queue: SharedQueue = Arc::new(InMemoryQueue::new(config.queue_name.clone()));
    Ok((ledger, queue))
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    let cli = Cli::parse();

    let config = PipelineConfig::default()
        .with_withdraw_budget(Duration::from_millis(cli.budget_ms))
        .with_max_attempts(cli.max_attempts);

    let (store, queue) = open_backends(cli.db_path.as_deref(), &config)?;
    let gateway = AdmissionGateway::new(store.clone(), queue.clone(), &config);
    let applier = Arc::new(TransactionApplier::new(store, queue.clone(), &config));

    // Settle whatever a previous run left unacknowledged.
    let recovered = applier.drain().await.into_diagnostic()?;
    if recovered > 0 {
        info!(recovered, "redelivered messages from a previous run");
    }

    let worker = if cli.concurrent {
        let (shutdown, rx) = watch::channel(false);
        let applier = applier.clone();
        Some((shutdown, tokio::spawn(async move { applier.run(rx).await })))
    } else {
        None
    };

    let file = File::open(cli.input).into_diagnostic()?;
    for request in RequestReader::new(file).requests() {
        match request {
            Ok(request) => {
                let id = request.id.clone();
                let result = gateway.submit(request).await;
                let response = Response::from(&result);
                info!(tx_id = %id, status = response.status, detail = %response.detail, "request handled");

                if worker.is_none() {
                    applier.drain().await.into_diagnostic()?;
                }
            }
            Err(e) => {
                error!(error = %e, "Error reading request");
            }
        }
    }

    if let Some((shutdown, handle)) = worker {
        let _ = shutdown.send(true);
        handle.await.into_diagnostic()?.into_diagnostic()?;
    }
    applier.drain().await.into_diagnostic()?;

    for dead in queue.dead_letters().await.into_diagnostic()? {
        warn!(
            attempts = dead.attempts,
            reason = %dead.reason,
            body = %String::from_utf8_lossy(&dead.body),
            "dead letter"
        );
    }

    let accounts = gateway.accounts().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = AccountWriter::new(stdout.lock());
    writer.write_accounts(accounts).into_diagnostic()?;

    Ok(())
}
