use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quiniela_gate::config::{GateConfig, LogConfig};
use quiniela_gate::http::{AdmissionService, HttpServer, RouteTable};
use quiniela_gate::ratelimit::{LimiterRegistry, SystemClock};

/// Request admission service for the quiniela API.
#[derive(Debug, Parser)]
#[command(name = "quiniela-gate", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "QUINIELA_GATE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Key clients by the X-Forwarded-For header
    #[arg(long)]
    trust_forwarded_for: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = GateConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    if cli.log_json {
        config.log.json = true;
    }
    if cli.trust_forwarded_for {
        config.server.trust_forwarded_for = true;
    }

    init_tracing(&config.log);

    info!("Starting Quiniela admission gate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %config.server.listen_addr,
        trust_forwarded_for = config.server.trust_forwarded_for,
        "Configuration loaded"
    );

    // Invalid policies abort startup here, before any request is served.
    let registry = Arc::new(LimiterRegistry::new(
        &config.rate_limiting,
        Arc::new(SystemClock::new()),
    )?);
    for (kind, policy) in registry.iter() {
        info!(
            policy = %kind,
            window_ms = policy.config().window.as_millis() as u64,
            limit = policy.config().max_requests,
            "Limiter ready"
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = registry.spawn_sweeper(config.rate_limiting.sweep_interval(), shutdown_rx);

    let routes = RouteTable::from_config(config.rate_limiting.routes.as_deref());
    info!(routes = routes.routes().len(), "Route table loaded");

    if !config.server.trust_forwarded_for {
        warn!(
            "X-Forwarded-For is not trusted; behind a proxy every client shares the proxy's quota"
        );
    }
    let service = AdmissionService::new(
        Arc::clone(&registry),
        routes,
        config.server.trust_forwarded_for,
    );

    HttpServer::new(config.server.listen_addr, service)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    shutdown_tx.send(true).ok();
    sweeper.await?;

    info!("Quiniela admission gate stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    if log.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }
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
