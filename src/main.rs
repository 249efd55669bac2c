use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::admission::{AdmissionPipeline, AdmissionSettings};
use turnstile::clock::SystemClock;
use turnstile::config::{StoreBackend, TurnstileConfig};
use turnstile::error::Result;
use turnstile::http::{AppState, HttpServer};
use turnstile::metrics::Metrics;
use turnstile::store::{CounterStore, MemoryStore, RedisStore};

/// API admission control gateway.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "TURNSTILE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Override the counter store backend
    #[arg(long, value_enum)]
    store: Option<StoreBackend>,

    /// Log filter, e.g. `info` or `turnstile=debug`
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    info!("Starting Turnstile admission gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(backend) = args.store {
        config.store.backend = backend;
    }
    config.validate()?;
    info!(
        listen_addr = %config.server.listen_addr,
        backend = ?config.store.backend,
        failure_policy = ?config.store.failure_policy,
        "Configuration loaded"
    );

    let store = build_store(&config).await?;
    let metrics = Arc::new(Metrics::new()?);
    let pipeline = AdmissionPipeline::new(
        store,
        Arc::new(SystemClock),
        AdmissionSettings::from(&config),
        metrics.clone(),
    );
    let state = AppState::new(Arc::new(pipeline), metrics);

    HttpServer::new(config.server.listen_addr, state)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Turnstile admission gateway stopped");
    Ok(())
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match args.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn build_store(config: &TurnstileConfig) -> Result<Arc<dyn CounterStore>> {
    match config.store.backend {
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.store.redis_url, config.store.timeout()).await?;
            store.ping().await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using in-process counter store; budgets are not shared between instances");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
