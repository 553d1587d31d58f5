use clap::Parser;
use commerce_engine::application::engine::CommerceEngine;
use commerce_engine::config::Config;
use commerce_engine::domain::ports::SharedStore;
use commerce_engine::infrastructure::in_memory::InMemoryStore;
#[cfg(feature = "storage-rocksdb")]
use commerce_engine::infrastructure::rocksdb::RocksDbStore;
use commerce_engine::interfaces::csv::account_writer::AccountWriter;
use commerce_engine::interfaces::csv::command_reader::CommandReader;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input commands CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// TOML configuration file. Falls back to COMMERCE_* environment variables.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_tracing() {
    // stdout carries the CSV result, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn in_memory_store(config: &Config) -> SharedStore {
    Arc::new(InMemoryStore::new().with_lock_timeout(config.storage.lock_timeout()))
}

#[cfg(feature = "storage-rocksdb")]
fn persistent_store(path: PathBuf, config: &Config) -> Result<SharedStore> {
    let store = RocksDbStore::open(path)
        .into_diagnostic()?
        .with_lock_timeout(config.storage.lock_timeout());
    Ok(Arc::new(store))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn persistent_store(_path: PathBuf, config: &Config) -> Result<SharedStore> {
    eprintln!(
        "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
    );
    Ok(in_memory_store(config))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = match &cli.config {
        Some(path) => Config::from_file(path).into_diagnostic()?,
        None => Config::from_env().into_diagnostic()?,
    };

    let store = match cli.db_path.or_else(|| config.data_dir.clone()) {
        Some(path) => persistent_store(path, &config)?,
        None => in_memory_store(&config),
    };
    let engine = CommerceEngine::new(config, store);

    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for command_result in reader.commands() {
        match command_result {
            Ok(command) => {
                if let Err(e) = engine.process_command(command).await {
                    eprintln!("Error processing command: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }

    let accounts = engine.into_accounts().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = AccountWriter::new(stdout.lock());
    writer.write_accounts(accounts).into_diagnostic()?;

    Ok(())
}
