//! gridd — the WireGrid daemon.
//!
//! Single binary that assembles the grid:
//! - State store (redb): node records and session affinity
//! - Node pool: registry, admission strategies, reservations
//! - Reservation sweeper
//! - HTTP boundary: session protocol, node registration, metrics
//!
//! # Usage
//!
//! ```text
//! gridd init-config --output wiregrid.toml
//! gridd run --config wiregrid.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wiregrid_core::GridConfig;
use wiregrid_metrics::GridMetrics;
use wiregrid_pool::NodePool;
use wiregrid_state::StateStore;

#[derive(Parser)]
#[command(name = "gridd", about = "WireGrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the grid.
    Run {
        /// Path to the TOML config file.
        #[arg(long, short, default_value = "wiregrid.toml")]
        config: PathBuf,
    },
    /// Write a starter config file.
    InitConfig {
        /// Where to write it.
        #[arg(long, short, default_value = "wiregrid.toml")]
        output: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => {
            let config = GridConfig::from_file(&config)
                .with_context(|| format!("loading config {}", config.display()))?;
            init_tracing(&config.logger.level);
            run(config).await
        }
        Command::InitConfig { output, force } => {
            init_tracing("info");
            init_config(&output, force)
        }
    }
}

/// `RUST_LOG` wins over the config file's level.
fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();
}

fn init_config(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }
    let content = GridConfig::scaffold().to_toml_string()?;
    std::fs::write(output, content)
        .with_context(|| format!("writing {}", output.display()))?;
    info!(path = %output.display(), "config written");
    Ok(())
}

fn open_store(connection: &str) -> anyhow::Result<StateStore> {
    let connection = connection.trim();
    if !connection.is_empty() && connection != "memory" {
        if let Some(parent) = Path::new(connection).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
    }
    let store = StateStore::connect(connection)
        .with_context(|| format!("opening state store {connection}"))?;
    info!(%connection, "state store opened");
    Ok(store)
}

async fn run(config: GridConfig) -> anyhow::Result<()> {
    info!("WireGrid daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let store = open_store(&config.db.connection)?;
    let metrics = Arc::new(GridMetrics::new());
    let pool = NodePool::from_config(&config.grid, store, metrics)?;
    info!(
        nodes = pool.snapshot().nodes().len(),
        strategies = config.grid.strategy_list.len(),
        "node pool initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let requests_shutdown = CancellationToken::new();

    // ── Start background tasks ─────────────────────────────────

    let sweeper = pool.clone();
    let sweep_interval = config.grid.sweep_interval;
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run_sweeper(sweep_interval, shutdown_rx).await;
    });

    // ── Start API server ───────────────────────────────────────

    let state = wiregrid_api::ApiState::new(pool, &config.grid, requests_shutdown.clone());
    let router = wiregrid_api::build_router(state, &config.metrics);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.grid.port));

    info!(%addr, metrics = config.metrics.enable, "grid listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
        requests_shutdown.cancel();
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = sweeper_handle.await;

    info!("WireGrid daemon stopped");
    Ok(())
}
