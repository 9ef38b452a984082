use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use turnstile::config::{StoreConfig, TurnstileConfig};
use turnstile::http::{AppState, GateConfig, HttpServer};
use turnstile::ratelimit::{CounterStore, FileStore, MemoryStore, RateLimiter, SharedSettings, SystemClock};
use turnstile::tasks;

/// Per-client fixed-window rate limiting service.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the HTTP listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    if args.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false).with_thread_ids(true))
            .with(filter)
            .init();
    }

    info!("Starting Turnstile Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.http_addr = listen;
    }
    let rl = &config.rate_limiting;

    let initial = rl.initial_settings()?;
    let settings = Arc::new(SharedSettings::new(initial)?);
    info!(
        http_addr = %config.server.http_addr,
        time_limit = initial.time_limit,
        count_limit = initial.count_limit,
        strategy = ?rl.strategy,
        store = ?rl.store,
        "Configuration loaded"
    );

    let store: Arc<dyn CounterStore> = match &rl.store {
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
        StoreConfig::File { path } => Arc::new(FileStore::open(path).await?),
    };

    let limiter = RateLimiter::new(store.clone(), settings.clone()).with_strategy(rl.strategy);
    info!("Rate limiter initialized");

    let sweeper = tasks::spawn_sweeper(
        store,
        settings.clone(),
        SystemClock,
        Duration::from_secs(rl.sweep_interval_secs.max(1)),
        rl.retention_secs,
    );
    let reloader = rl.settings_path.clone().map(|path| {
        info!(path = %path.display(), interval_secs = rl.reload_interval_secs, "Watching settings file");
        tasks::spawn_settings_reloader(
            settings.clone(),
            path,
            Duration::from_secs(rl.reload_interval_secs.max(1)),
        )
    });

    if config.server.admin_token.is_none() {
        warn!("No admin_token configured, admin API is disabled");
    }
    let state = Arc::new(
        AppState::new(Arc::new(limiter), settings, GateConfig::from(rl))
            .with_admin_token(config.server.admin_token.clone()),
    );
    let server = HttpServer::new(config.server.http_addr, state);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    sweeper.abort();
    if let Some(reloader) = reloader {
        reloader.abort();
    }

    info!("Turnstile Rate Limiting Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
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
