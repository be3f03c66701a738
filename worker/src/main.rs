use clap::Parser;
use std::sync::Arc;
use sysinfo::System;
use tracing::info;
use tracing_subscriber::EnvFilter;
use worker::client::CoordinatorClient;
use worker::{api, WorkerState};

/// Pipenet worker - loads assigned model segments and executes hops
#[derive(Parser, Debug)]
#[command(name = "worker")]
#[command(about = "Pipenet worker for distributed inference")]
#[command(version)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Coordinator base URL
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    coordinator: String,

    /// Externally reachable base URL of this worker; defaults to
    /// http://127.0.0.1:<port>
    #[arg(long)]
    advertise: Option<String>,

    /// Free memory to report, in bytes; defaults to the system's
    /// currently available memory
    #[arg(long)]
    free_memory_bytes: Option<u64>,

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

    let advertise = cli
        .advertise
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", cli.port));
    let free_memory_bytes = cli.free_memory_bytes.unwrap_or_else(detect_free_memory);

    info!(
        advertise = %advertise,
        coordinator = %cli.coordinator,
        free_memory_bytes,
        "Starting pipenet worker"
    );

    let coordinator = Arc::new(CoordinatorClient::new(cli.coordinator));
    let state = WorkerState::new(Arc::clone(&coordinator));
    let app = api::create_router(state);

    let addr = format!("0.0.0.0:{}", cli.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "Worker listening");

    // Announce once the listener is up, off the serve path.
    tokio::spawn(async move {
        let address = protocol::WorkerAddress::new(advertise);
        if let Err(e) = coordinator.announce(address, free_memory_bytes).await {
            tracing::error!(error = %e, "Could not join the coordinator");
        }
    });

    axum::serve(listener, app).await?;
    Ok(())
}

/// Currently available system memory.
fn detect_free_memory() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    system.available_memory()
}
