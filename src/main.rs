use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trustline_reconciler::{
    Config, JsonRpcOracle, ReconciliationDriver, ThreadSleeper, WalletStore, WalletTable,
};

#[derive(Parser)]
#[command(name = "trustline-reconciler", version, about = "Move airdrop wallets without the required trustline into a missing table")]
struct Cli {
    /// JSON config file (defaults are used for anything it leaves out)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database, overrides `database_path` from the config
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check every airdrop wallet against the ledger (two passes)
    Run,
    /// Load `wallet,balance` rows from a CSV file into the airdrop table
    Import { csv: PathBuf },
    /// Write the missing-trustline table to a CSV file
    Export { csv: PathBuf },
    /// Show row counts for the airdrop, retry and missing tables
    Status,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default().finalize()?,
    };

    if let Some(db) = &cli.db {
        config.database_path = db.clone();
    }

    Ok(config)
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let mut store = WalletStore::open(&config.database_path, config.tables.clone())?;

    match &cli.command {
        Command::Run => run_reconciliation(&config, &mut store)?,
        Command::Import { csv } => {
            let imported = store.import_csv(csv)?;
            info!(rows = imported, table = %config.tables.source, "Import complete");
        }
        Command::Export { csv } => {
            let exported = store.export_missing_csv(csv)?;
            info!(rows = exported, file = %csv.display(), "Export complete");
        }
        Command::Status => print_status(&config, &store)?,
    }

    Ok(())
}

fn run_reconciliation(config: &Config, store: &mut WalletStore) -> Result<()> {
    let oracle = JsonRpcOracle::new(
        Duration::from_secs(config.ledger.request_timeout_seconds),
        config.ledger.page_limit,
    )
    .context("Failed to build ledger HTTP client")?;

    info!(
        database = %config.database_path.display(),
        endpoints = config.ledger.endpoints.len(),
        issuer = %config.trustline.issuer,
        currency = %config.trustline.currency,
        "Starting trustline reconciliation"
    );

    let driver = ReconciliationDriver::new(config, oracle, ThreadSleeper);
    let report = driver.run(store)?;

    info!("{}", report.summary());
    info!("All done.");

    Ok(())
}

fn print_status(config: &Config, store: &WalletStore) -> Result<()> {
    println!("📊 {}", config.database_path.display());
    for (label, table) in [
        ("airdrop", WalletTable::Source),
        ("retry", WalletTable::Retry),
        ("missing", WalletTable::Missing),
    ] {
        println!(
            "  {:<8} {:<24} {}",
            label,
            table.name(&config.tables),
            store.count(table)?
        );
    }
    Ok(())
}
