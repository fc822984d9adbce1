//! Hookline Server
//!
//! Runs declarative subscription queries against internal domain events and
//! delivers their results to registered webhook URLs.

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::{ConfigLoader, get_database_url};
use hookline_core::discovery::ChannelDiscovery;
use hookline_core::framework::DatabaseProcessor;
use hookline_core::pipeline::Pipeline;
use hookline_core::processors::ChannelMigration;
use hookline_core::query::JsonQueryExecutor;
use hookline_core::registration::WebhookRegistrar;
use hookline_core::store::PgStore;
use server::{build_router, run_server};
use shutdown::{shutdown_signal, spawn_config_reload_handler};
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Hookline - webhook delivery for subscription queries
#[derive(Parser, Debug)]
#[command(name = "hookline-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./hookline-config.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting hookline-server v{}", env!("CARGO_PKG_VERSION"));

    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;

    let listen_addr = loaded_config.server.listen;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    let store = Arc::new(PgStore::new(DatabaseProcessor::new(db_pool.clone())));
    let registry = Arc::new(loaded_config.registry);
    let executor = Arc::new(JsonQueryExecutor::new());
    let pipeline_config = loaded_config.pipeline;
    let discovery = ChannelDiscovery::new(executor.clone(), registry.clone());

    let registrar = WebhookRegistrar::new(
        store.clone(),
        store.clone(),
        discovery.clone(),
        pipeline_config.verification_timeout,
        &pipeline_config.user_agent,
    )?;
    let pipeline = Pipeline::new(
        pipeline_config,
        store.clone(),
        store.clone(),
        executor,
        registry,
    )?;

    // Bindings computed under an older logic version are refreshed before
    // any event is processed. Final payloads of webhooks disabled here wait
    // in the delivery queue until the pipeline starts.
    let migration = ChannelMigration::new(
        store.clone(),
        store,
        discovery,
        pipeline.delivery_queue(),
    );
    let report = migration.run().await.map_err(|e| {
        tracing::error!("Failed to migrate channel bindings: {}", e);
        e
    })?;
    tracing::info!(
        version = report.version,
        migrated = report.migrated,
        invalidated = report.invalidated,
        "Channel bindings up to date"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pipeline_handle = pipeline.start(shutdown_rx)?;

    let state = AppState::new(
        registrar,
        migration,
        pipeline_handle.bus(),
        loaded_config.auth,
    );

    // Spawn config reload handler (listens for SIGHUP)
    let reload_notify = spawn_config_reload_handler(state.clone(), config_loader);

    let router = build_router(state);

    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr, shutdown_signal()).await;

    // Stop accepting first, then drain the pipeline stage by stage.
    let _ = shutdown_tx.send(true);
    pipeline_handle.join().await;

    reload_notify.notify_one();

    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
