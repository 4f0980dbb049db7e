use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use quota_gate::config::{QuotaGateConfig, StoreBackend};
use quota_gate::http::{HttpServer, RateLimitState};
use quota_gate::ratelimit::RateLimiter;
use quota_gate::store::{CountingStore, InMemoryStore, RedisStore};

/// Per-identity rate limiting in front of an HTTP service.
#[derive(Parser, Debug)]
#[command(name = "quota-gate", version, about)]
struct Args {
    /// Path to a configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!("Starting Quota Gate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = QuotaGateConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        backend = ?config.store.backend,
        token_limit = config.rate_limiting.rate_limit_token,
        ip_limit = config.rate_limiting.rate_limit_ip,
        block_duration_secs = config.rate_limiting.block_duration_secs,
        "Configuration loaded"
    );

    match config.store.backend {
        StoreBackend::Redis => {
            let store = Arc::new(RedisStore::connect(&config.store.redis_url()).await?);
            run(&config, store).await
        }
        StoreBackend::Memory => {
            let store = Arc::new(InMemoryStore::new());
            let sweeper = store.spawn_sweeper(config.store.sweep_interval());
            let result = run(&config, store).await;
            sweeper.abort();
            result
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }
}

async fn run<S>(config: &QuotaGateConfig, store: Arc<S>) -> anyhow::Result<()>
where
    S: CountingStore + 'static,
{
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limiting.limiter_config(),
        store,
    ));
    info!("Rate limiter initialized");

    let state = RateLimitState::new(limiter, config.token_header_name()?)
        .trust_forwarded_for(config.server.trust_forwarded_for);

    HttpServer::new(config.server.listen_addr, state)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Quota Gate stopped");
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
