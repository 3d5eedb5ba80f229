//! # Conveyor Orchestration Server
//!
//! Production deployment target: runs the consumers, janitor and
//! control-plane API in one process. Boots with the built-in `echo` job;
//! real deployments build their own registry and call
//! [`OrchestrationBootstrap::bootstrap`] from their own binary.
//!
//! ```bash
//! CONVEYOR_DATABASE_URL=postgres://... cargo run --bin conveyor-server
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{error, info};

use conveyor_orchestration::jobs::builtin_registry;
use conveyor_orchestration::OrchestrationBootstrap;
use conveyor_shared::logging;

/// Upper bound on graceful shutdown before the process just exits
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    info!("starting conveyor orchestration server");
    info!("   version: {}", env!("CARGO_PKG_VERSION"));

    let registry = Arc::new(builtin_registry()?);
    let mut handle = OrchestrationBootstrap::bootstrap(registry)
        .await
        .map_err(|e| format!("bootstrap failed: {e}"))?;

    info!("orchestration server started; press Ctrl+C to shut down");

    shutdown_signal().await;
    info!("shutdown signal received");

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle.stop()).await {
        Ok(Ok(())) => info!("orchestration system stopped"),
        Ok(Err(e)) => error!(error = %e, "orchestration system stopped uncleanly"),
        Err(_) => error!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "graceful shutdown timed out, forcing exit"
        ),
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
