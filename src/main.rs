use std::io;
use std::process::ExitCode;

use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use content_experiments::cli::{self, Args};
use content_experiments::config::StorageBackend;
use content_experiments::{EngineConfig, ExperimentService, MemoryStore, Result, SqliteStore, UserRef};

/// Logs go to stderr so `report --json` output stays machine-readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("EXPERIMENTS_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .init();
}

fn run(args: Args) -> Result<bool> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(db) = args.db {
        config.storage.backend = StorageBackend::Sqlite;
        config.storage.path = db;
    }

    let actor = UserRef::new(args.actor);
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!(target: "experiments::cli", "memory backend: nothing persists after this command");
            let service = ExperimentService::new(MemoryStore::new(), config);
            cli::run(&service, args.command, &actor, &mut out)
        }
        StorageBackend::Sqlite => {
            let store = SqliteStore::from_config(&config.storage)?;
            let service = ExperimentService::new(store, config);
            cli::run(&service, args.command, &actor, &mut out)
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        // Validation errors were already printed verbatim.
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("{} {e}", "error:".bright_red().bold());
            ExitCode::from(2)
        }
    }
}
