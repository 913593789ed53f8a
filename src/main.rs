//! localbucket - S3-compatible object storage on a local filesystem

use clap::Parser;
use localbucket::api::handlers::{router, AppState};
use localbucket::config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// localbucket - minimal S3 endpoint backed by a local directory
#[derive(Parser, Debug)]
#[command(name = "localbucket")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Storage root directory (overrides config)
    #[arg(short, long, value_name = "DIR")]
    storage_root: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;

    // CLI overrides
    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }
    if let Some(ref root) = cli.storage_root {
        config.storage_root = root.clone();
    }

    if config.log_enabled {
        let log_level = if cli.verbose {
            "localbucket=trace,tower_http=trace".to_string()
        } else {
            config.log_level.clone()
        };

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| log_level.into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting localbucket S3 server");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Storage root: {:?}", config.storage_root);
    info!("  Access key: {}", config.access_key_id);
    match &config.signing_region {
        Some(region) => info!("  Signing region: {} (fixed)", region),
        None => info!("  Signing region: from credential scope"),
    }
    info!(
        "  Max buffered body: {} MB",
        config.max_object_size / 1024 / 1024
    );

    let state = Arc::new(AppState::from_config(&config).await?);
    let app = router(state);

    // Start server with graceful shutdown
    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("localbucket listening on http://{}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Handle shutdown signals (SIGINT, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
