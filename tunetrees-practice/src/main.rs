//! tunetrees-practice - practice queue service
//!
//! Serves the practice queue, staged evaluations and view state for
//! TuneTrees clients over HTTP, backed by SQLite.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tunetrees_common::config::{CliOverrides, ConfigResolver, BIND_ENV, DATABASE_ENV};
use tunetrees_common::db::init_database;
use tunetrees_common::events::EventBus;
use tunetrees_practice::db::SqliteBackend;
use tunetrees_practice::{build_router, AppState, SessionRegistry};

/// Command-line arguments for tunetrees-practice
#[derive(Parser, Debug)]
#[command(name = "tunetrees-practice")]
#[command(about = "Practice queue service for TuneTrees")]
#[command(version)]
struct Args {
    /// SQLite database file
    #[arg(short, long, env = DATABASE_ENV)]
    database: Option<PathBuf>,

    /// Address to listen on (host:port)
    #[arg(short, long, env = BIND_ENV)]
    bind: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConfigResolver::new(CliOverrides {
        database_path: args.database,
        bind_addr: args.bind,
        config_file: args.config,
    })
    .resolve();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("tunetrees_practice={0},tunetrees_common={0},tower_http=info", config.log_level)
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting TuneTrees practice service v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!("Database path: {}", config.database_path.display());

    let pool = match init_database(&config.database_path).await {
        Ok(pool) => {
            info!("✓ Database ready");
            pool
        }
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e).context("Failed to initialize database");
        }
    };

    let backend = Arc::new(SqliteBackend::new(
        pool,
        config.default_delinquency_window_days,
    ));
    let registry = Arc::new(SessionRegistry::new(
        backend,
        EventBus::default(),
        config.clone(),
    ));

    let app = build_router(AppState::new(Arc::clone(&registry)));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    info!("tunetrees-practice listening on http://{}", config.bind_addr);
    info!("Health check: http://{}/health", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Pending view-state writes must reach the database before exit
    registry.teardown_all().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
