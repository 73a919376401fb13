//! tskv-gateway server
//!
//! Runs the device ingestion pipeline and the history RPC surface in one
//! process.
//!
//! # Endpoints
//!
//! ## History
//! - `POST /rpc/GetDeviceAttributesHistory` - Merged multi-key history
//! - `POST /rpc/GetDeviceHistory` - Newest rows of one key plus total
//! - `POST /rpc/GetDeviceHistoryWithPageAndPage` - Cursor pagination
//! - `POST /rpc/GetDeviceKVDataWithNoAggregate` - Raw plot points
//! - `POST /rpc/GetDeviceKVDataWithAggregate` - Windowed aggregate
//!
//! ## Admin
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus metrics
//!
//! # CLI Commands
//!
//! - `start` - Start ingestion and the HTTP server (default)
//! - `check-config` - Validate configuration file
//! - `init-schema` - Create the database and logical table, then exit
//!
//! # Configuration
//!
//! The server reads configuration from:
//! 1. `--config <path>`
//! 2. `TSKV_CONFIG` environment variable (path to TOML file)
//! 3. `./tskv.toml` in current directory
//! 4. Default configuration

use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{signal, sync::broadcast};
use tracing::{debug, info, warn};
use tskv_gateway::{
    bus::BusSubscriber,
    config::{ApplicationConfig, StoreBackend},
    error::Error,
    ingestion::IngestionPipeline,
    metrics::RpcMetrics,
    rpc::{build_router, AppState, HistoryService},
    storage::{InMemoryStore, PartitionRouter, TdengineStore, TsStore},
};

// =============================================================================
// CLI Definition
// =============================================================================

/// tskv-gateway - device telemetry ingestion and history queries
#[derive(Parser)]
#[command(name = "tskv-gateway")]
#[command(version)]
#[command(about = "Device telemetry ingestion and history queries over a wide-row TSDB", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (overrides TSKV_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override listen address (e.g., 0.0.0.0:8080)
    #[arg(short, long, global = true)]
    listen: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start ingestion and the HTTP server (default)
    Start,

    /// Validate configuration file without starting the server
    CheckConfig,

    /// Create the database and logical table, then exit
    InitSchema,
}

// =============================================================================
// Setup
// =============================================================================

/// Graceful shutdown signal handler
///
/// A failed signal registration is logged and that signal source is ignored.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {},
            Err(e) => {
                warn!(
                    error = %e,
                    "Ctrl+C handler installation failed - graceful shutdown unavailable"
                );
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                warn!(
                    error = %e,
                    "SIGTERM handler installation failed - SIGTERM shutdown unavailable"
                );
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Result<ApplicationConfig, Box<dyn std::error::Error>> {
    let (mut config, source) = ApplicationConfig::resolve(cli.config.as_deref())?;
    if let Some(listen) = &cli.listen {
        let addr: SocketAddr = listen.parse()?;
        config.server.host = addr.ip().to_string();
        config.server.port = addr.port();
    }
    config.validate().map_err(Error::Configuration)?;
    if let Some(path) = source {
        debug!(path = %path.display(), "Configuration loaded");
    }
    Ok(config)
}

/// Instantiate the configured store backend
fn build_store(
    config: &ApplicationConfig,
) -> Result<(Arc<dyn TsStore>, String), Box<dyn std::error::Error>> {
    match config.store.backend {
        StoreBackend::Tdengine => {
            let store = TdengineStore::new(config.store.tdengine.clone())?;
            Ok((Arc::new(store), config.store.tdengine.table.clone()))
        },
        StoreBackend::Memory => {
            warn!("Using the in-memory store, data is lost on exit");
            Ok((
                Arc::new(InMemoryStore::new()),
                config.store.tdengine.table.clone(),
            ))
        },
    }
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

// =============================================================================
// CLI Command Handlers
// =============================================================================

/// Validate configuration and print summary
fn cmd_check_config(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli)?;

    println!("Configuration is valid!");
    println!();
    println!("Server Settings:");
    println!("  Listen address: {}", config.server.listen_addr());
    println!("  Log level: {}", config.server.log_level);
    println!();
    println!("Store Settings:");
    println!("  Backend: {:?}", config.store.backend);
    if config.store.backend == StoreBackend::Tdengine {
        println!("  URL: {}", config.store.tdengine.url);
        println!(
            "  Table: {}.{}",
            config.store.tdengine.database, config.store.tdengine.table
        );
    }
    println!();
    println!("Bus Settings:");
    println!("  Enabled: {}", config.bus.enabled);
    if config.bus.enabled {
        println!("  Channel: {}", config.bus.channel);
    }
    println!();
    println!("Ingestion Settings:");
    println!("  Batch size: {}", config.ingestion.batch_size);
    println!("  Write workers: {}", config.ingestion.write_workers);
    println!("  Queue capacity: {}", config.ingestion.channel_buffer_size);

    Ok(())
}

/// Create the database and logical table
async fn cmd_init_schema(config: &ApplicationConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (store, _) = build_store(config)?;
    store.initialize().await?;
    info!(store = store.store_id(), "Schema ready");
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Commands::CheckConfig) = &cli.command {
        return cmd_check_config(&cli);
    }

    let config = load_config(&cli)?;
    init_tracing(&config.server.log_level);

    if let Some(Commands::InitSchema) = &cli.command {
        return cmd_init_schema(&config).await;
    }

    info!("Starting tskv-gateway v{}", env!("CARGO_PKG_VERSION"));

    // Store
    let (store, table) = build_store(&config)?;
    store.initialize().await?;

    // Ingestion
    let router = PartitionRouter::with_table(Arc::clone(&store), table);
    let mut pipeline = IngestionPipeline::with_router(
        config.ingestion.to_ingestion_config()?,
        Arc::clone(&store),
        router,
    )?;
    pipeline.start()?;

    // Bus
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let bus_handle = if config.bus.enabled {
        let subscriber = BusSubscriber::new(config.bus.clone(), pipeline.intake()?);
        let shutdown = shutdown_tx.subscribe();
        Some(tokio::spawn(async move { subscriber.run(shutdown).await }))
    } else {
        info!("Bus subscriber disabled");
        None
    };

    // HTTP
    let state = Arc::new(
        AppState::new(
            HistoryService::with_settings(Arc::clone(&store), config.query.clone()),
            RpcMetrics::new()?,
        )
        .with_ingestion(pipeline.metrics()),
    );
    let app = build_router(state, &config.server.cors_allowed_origins);

    let addr: SocketAddr = config.server.listen_addr().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Bus stops before the workers drain
    if shutdown_tx.send(()).is_err() {
        debug!("Bus subscriber already stopped");
    }
    if let Some(handle) = bus_handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "Bus subscriber task failed");
        }
    }

    let stats = pipeline.shutdown().await?;
    info!(summary = %stats, "Server shutdown complete");
    Ok(())
}
