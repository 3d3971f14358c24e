//! kindred-match - Community Matching Service
//!
//! Accepts onboarding submissions over HTTP, matches each user to local
//! communities in the background and pushes the result over WebSocket.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kindred_match::config::ServiceConfig;
use kindred_match::services::{LanguageModel, OpenAiClient};

/// Command-line arguments (override config file and environment)
#[derive(Parser, Debug)]
#[command(name = "kindred-match")]
#[command(about = "Community matching service")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long, env = "KINDRED_CONFIG")]
    config: Option<String>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database file
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServiceConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(database) = args.database {
        config.database.path = Some(database);
    }
    config.validate().context("Invalid configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting kindred-match (Community Matching) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let db_path = config.database.resolved_path();
    info!("Database: {}", db_path.display());

    let db_pool = kindred_match::db::init_database_pool(&db_path, config.database.max_connections)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    let language_model: Arc<dyn LanguageModel> =
        Arc::new(OpenAiClient::new(&config.language_model).context("Failed to build language model client")?);

    let shutdown = CancellationToken::new();
    let config = Arc::new(config);
    let state = kindred_match::start_services(db_pool, config.clone(), language_model, shutdown.clone())
        .await
        .context("Failed to start services")?;

    let app = kindred_match::build_router(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/api/v1/health", addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    state.result_bus.close();

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
