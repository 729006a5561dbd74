use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sluice::config::{LogFormat, LoggingConfig, SluiceConfig, StoreBackend};
use sluice::http::{router, Gate, HttpServer};
use sluice::ratelimit::{FixedBucketLimiter, Replenisher, SlidingWindowLimiter, SystemClock};
use sluice::store::{CounterStore, MemoryStore, RedisStore};

/// Shared rate limit admission service.
#[derive(Debug, Parser)]
#[command(name = "sluice", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Redis connection URL
    #[arg(long)]
    store_url: Option<String>,

    /// Use the process-local store instead of Redis
    #[arg(long)]
    memory_store: bool,

    /// Maximum admitted requests per cycle or window
    #[arg(long)]
    limit: Option<i64>,

    /// Sliding window length in minutes
    #[arg(long)]
    window: Option<i64>,

    /// Log filter directive (e.g. "info" or "sluice=debug")
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut SluiceConfig) {
        if let Some(addr) = self.http_addr {
            config.server.http_addr = addr;
        }
        if let Some(url) = &self.store_url {
            config.store.url = url.clone();
        }
        if self.memory_store {
            config.store.backend = StoreBackend::Memory;
        }
        if let Some(limit) = self.limit {
            config.limits.limit = limit;
        }
        if let Some(window) = self.window {
            config.limits.window_minutes = window;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = SluiceConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    init_tracing(&config.logging)?;

    let instance_id = Uuid::new_v4();
    info!(
        instance_id = %instance_id,
        version = env!("CARGO_PKG_VERSION"),
        "Starting Sluice admission service"
    );
    info!(
        http_addr = %config.server.http_addr,
        limit = config.limits.limit,
        window_minutes = config.limits.window_minutes,
        "Configuration loaded"
    );

    let store: Arc<dyn CounterStore> = match config.store.backend {
        StoreBackend::Redis => Arc::new(RedisStore::connect(&config.store.url).await?),
        StoreBackend::Memory => {
            warn!("Using the in-memory counter store; limits are not shared between instances");
            Arc::new(MemoryStore::new())
        }
    };

    let limits = &config.limits;
    let fixed = Arc::new(FixedBucketLimiter::new(
        store.clone(),
        limits.bucket_key.clone(),
        limits.limit,
        limits.replenish_interval(),
    ));
    fixed.initialize().await?;
    let replenisher = Replenisher::spawn(fixed.clone());

    let window = Arc::new(SlidingWindowLimiter::new(
        store.clone(),
        Arc::new(SystemClock),
        limits.window_key.clone(),
        limits.limit,
        limits.window_minutes,
    ));

    let deadline = config.server.store_timeout();
    let app = router(
        Gate::new(fixed, deadline),
        Gate::new(window, deadline),
        store,
    );

    let server = HttpServer::bind(config.server.http_addr, app).await?;
    let served = server.serve_with_shutdown(shutdown_signal()).await;

    replenisher.shutdown().await;
    served?;

    info!("Sluice admission service stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
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
