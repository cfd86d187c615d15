// src/main.rs
use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod clock;
mod config;
mod firestore;
mod model;
mod recorder;
mod roster;
mod roster_refresh;
mod store;
mod validator;

#[cfg(test)]
mod api_tests;
#[cfg(test)]
mod test_support;

use api::{AppState, InFlight};
use clock::{Clock, SystemClock};
use config::{Config, StoreBackend};
use firestore::FirestoreStore;
use recorder::LeaveRecorder;
use roster::RosterCache;
use roster_refresh::run_roster_refresh;
use store::{DocumentStore, MemoryStore};
use validator::Validator;

#[derive(Debug, Parser)]
#[command(name = "izin-core", version, about = "Student leave/sick notice backend")]
struct Cli {
    /// Use the in-memory store instead of Firestore.
    #[arg(long)]
    memory: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Load the student roster once and print it.
    Roster {
        /// Only print students whose name contains this text.
        #[arg(long)]
        query: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("Loading configuration failed")?;
    if cli.memory {
        config.store_backend = StoreBackend::Memory;
    }
    info!("Configuration loaded ({:?} store).", config.store_backend);

    let store = build_store(&config).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, store).await,
        Command::Roster { query, limit } => print_roster(&config, store, query, limit).await,
    }
}

async fn build_store(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    match config.store_backend {
        StoreBackend::Firestore => {
            let client = FirestoreStore::new(config.firestore()?)
                .context("Failed to initialize Firestore client")?;
            Ok(Arc::new(client))
        }
        StoreBackend::Memory => {
            let store = MemoryStore::new();
            match &config.seed_path {
                Some(path) => {
                    store
                        .seed_students(&config.students_collection, path)
                        .await
                        .context("Seeding in-memory store failed")?;
                }
                None => warn!("In-memory store has no seed file; the roster will be empty"),
            }
            Ok(Arc::new(store))
        }
    }
}

async fn serve(config: Config, store: Arc<dyn DocumentStore>) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.utc_offset()?));

    let roster = Arc::new(RosterCache::new(
        store.clone(),
        config.students_collection.clone(),
        config.roster_key,
    ));
    match roster.refresh().await {
        Ok(index) if index.is_empty() => warn!("Initial roster load returned no students"),
        Ok(index) => info!("Initial roster loaded: {} students", index.len()),
        Err(e) => error!(
            "Initial roster load failed: {}. Submissions are rejected until a reload succeeds.",
            e
        ),
    }
    if let Some(secs) = config.roster_refresh_secs.filter(|s| *s > 0) {
        tokio::spawn(run_roster_refresh(roster.clone(), Duration::from_secs(secs)));
    }

    let recorder = Arc::new(LeaveRecorder::new(
        store.clone(),
        clock.clone(),
        config.ledger_collections(),
    ));

    let state = AppState {
        roster,
        validator: Validator::new(config.cutoff_hour),
        recorder,
        clock,
        in_flight: Arc::new(InFlight::default()),
    };
    info!(
        "Accepting same-day submissions until {:02}:00 (UTC{:+})",
        state.validator.cutoff_hour(),
        config.utc_offset_hours
    );

    let app = api::router(state);
    let addr = config.bind_addr()?;

    match (&config.cert_path, &config.key_path) {
        (Some(cert_path), Some(key_path)) => {
            let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
                .await
                .context("Failed to load TLS cert/key")?;
            info!("Starting server on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await
                .context("HTTPS server failed")?;
        }
        _ => {
            info!("Starting server on http://{}", addr);
            axum_server::bind(addr)
                .serve(app.into_make_service())
                .await
                .context("HTTP server failed")?;
        }
    }
    Ok(())
}

async fn print_roster(
    config: &Config,
    store: Arc<dyn DocumentStore>,
    query: Option<String>,
    limit: usize,
) -> Result<()> {
    let index = roster::load(store.as_ref(), &config.students_collection, config.roster_key)
        .await
        .context("Loading roster failed")?;
    let students: Vec<_> = match &query {
        Some(q) => index.suggest(q, limit),
        None => index.students().iter().collect(),
    };
    for student in &students {
        println!("{}\t{}\t{}", student.id, student.name, student.class);
    }
    info!("{} of {} students shown", students.len(), index.len());
    Ok(())
}
