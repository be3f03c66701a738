use clap::Parser;
use coordinator::catalog::ModelCatalog;
use coordinator::cost::DimensionCostModel;
use coordinator::dispatch::HttpDispatcher;
use coordinator::{api, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Pipenet coordinator - partitions models across workers and drives
/// pipelined generation
#[derive(Parser, Debug)]
#[command(name = "coordinator")]
#[command(about = "Pipenet coordinator for distributed inference")]
#[command(version)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Directory holding models.json and per-model configurations
    #[arg(long, default_value = "models", env = "PIPENET_MODELS_ROOT")]
    models_root: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!(models_root = %cli.models_root.display(), "Starting pipenet coordinator");

    let state = AppState::new(
        ModelCatalog::new(cli.models_root),
        Arc::new(HttpDispatcher::new()?),
        Arc::new(DimensionCostModel),
    );

    let app = api::create_router(state);

    let addr = format!("0.0.0.0:{}", cli.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "Coordinator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Coordinator shut down");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
