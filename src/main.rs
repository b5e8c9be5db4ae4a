use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use satgate::config::Config;
use satgate::gateway::Gateway;
use satgate::store::{ClickHouseStore, Store};

/// Satellite telemetry ingestion gateway.
#[derive(Parser)]
#[command(name = "satgate", about)]
struct Cli {
    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info.
mod version {
    /// Release version string.
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Target OS.
    pub fn target_os() -> &'static str {
        std::env::consts::OS
    }

    /// Target architecture.
    pub fn target_arch() -> &'static str {
        std::env::consts::ARCH
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!("{} ({}/{})", RELEASE, target_os(), target_arch())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("satgate {}", version::full());
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    let cfg = Config::from_env();
    cfg.validate().context("validating configuration")?;

    tracing::info!(
        version = version::RELEASE,
        port = cfg.port,
        batch_size = cfg.batch_size,
        batch_timeout_ms = cfg.batch_timeout.as_millis() as u64,
        max_retries = cfg.max_retries,
        circuit_breaker_threshold = cfg.circuit_breaker_threshold,
        max_buffer_size = cfg.max_buffer_size,
        wal_path = %cfg.wal_path.display(),
        "starting satgate",
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: Config) -> Result<()> {
    // Connect the store before accepting traffic.
    let store = ClickHouseStore::connect(&cfg.database_url, cfg.max_connections)
        .await
        .context("connecting to store")?;
    let store = Arc::new(Store::ClickHouse(store));

    let shutdown_timeout = cfg.shutdown_timeout;
    let port = cfg.port;

    let mut gateway = Gateway::new(cfg, store);
    gateway.start();

    // Set up signal handling.
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    tracing::info!("received SIGINT, shutting down");
                }
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM, shutting down");
                }
            }

            shutdown.cancel();
        });
    }

    // Serve HTTP until the shutdown signal fires.
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("listening on {addr}"))?;

    tracing::info!(addr = %addr, "http server started");

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, gateway.router())
        .with_graceful_shutdown(async move {
            serve_shutdown.cancelled().await;
        })
        .await
        .context("http server error")?;

    // Drain the pipeline within the shutdown deadline.
    if tokio::time::timeout(shutdown_timeout, gateway.stop())
        .await
        .is_err()
    {
        tracing::error!(
            timeout_ms = shutdown_timeout.as_millis() as u64,
            "shutdown deadline exceeded, abandoning remaining tasks",
        );
    }

    tracing::info!("satgate stopped");

    Ok(())
}
