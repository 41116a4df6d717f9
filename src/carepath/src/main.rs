//! CarePath — patient care journey orchestrator.
//!
//! Main entry point that wires the store, the journey engine, and the HTTP API.

use carepath_api::ApiServer;
use carepath_core::config::{AppConfig, StoreBackend};
use carepath_core::event_bus::TracingSink;
use carepath_journey::demo::seed_demo_journey;
use carepath_journey::{JourneyEngine, JourneyStore, MemoryStore, RunStore};
use carepath_store::RedisStore;
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "carepath")]
#[command(about = "Patient care journey orchestrator")]
#[command(version)]
struct Cli {
    /// Path to a configuration file (TOML, YAML or JSON)
    #[arg(long, env = "CAREPATH_CONFIG")]
    config: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "CAREPATH__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Persistence backend (overrides config)
    #[arg(long, value_enum, env = "CAREPATH__STORE__BACKEND")]
    store: Option<StoreArg>,

    /// Redis connection URL (overrides config)
    #[arg(long, env = "CAREPATH__STORE__REDIS_URL")]
    redis_url: Option<String>,

    /// Create the sample recovery journey on startup
    #[arg(long, env = "CAREPATH_SEED_DEMO", default_value_t = false)]
    seed_demo: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StoreArg {
    Memory,
    Redis,
}

impl From<StoreArg> for StoreBackend {
    fn from(arg: StoreArg) -> Self {
        match arg {
            StoreArg::Memory => StoreBackend::Memory,
            StoreArg::Redis => StoreBackend::Redis,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "carepath=info,carepath_journey=info,carepath_api=info,tower_http=info".into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("CarePath starting up");

    // Load configuration
    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(store) = cli.store {
        config.store.backend = store.into();
    }
    if let Some(url) = cli.redis_url {
        config.store.redis_url = url;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        store = ?config.store.backend,
        max_steps_per_run = ?config.engine.max_steps_per_run,
        "Configuration loaded"
    );

    // Initialize persistence
    let (journeys, runs): (Arc<dyn JourneyStore>, Arc<dyn RunStore>) = match config.store.backend
    {
        StoreBackend::Memory => {
            warn!("Using in-memory store; runs will not survive a restart");
            let store = Arc::new(MemoryStore::new());
            (store.clone(), store)
        }
        StoreBackend::Redis => {
            let store = Arc::new(RedisStore::connect(&config.store).await.map_err(|e| {
                error!(error = %e, "Failed to connect to Redis");
                e
            })?);
            (store.clone(), store)
        }
    };

    let engine =
        JourneyEngine::new(journeys, runs, &config.engine).with_event_sink(Arc::new(TracingSink));

    if cli.seed_demo {
        let journey = seed_demo_journey(&engine).await?;
        info!(journey_id = %journey.id, name = %journey.name, "Demo journey created");
    }

    // Pick up runs that were in flight when the previous process stopped
    let resumed = engine.resume_active_runs().await?;
    info!(resumed, "Unfinished runs resumed");

    let api_server = ApiServer::new(config.clone(), engine.clone());

    if config.metrics.enabled {
        if let Err(e) = api_server.start_metrics() {
            error!(error = %e, "Failed to start metrics exporter");
        }
    }

    info!("CarePath is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http(shutdown_signal()).await?;

    engine.shutdown();
    info!("CarePath stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
