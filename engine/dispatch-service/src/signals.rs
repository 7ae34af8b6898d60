//! Signal handling for graceful shutdown

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::service::DispatchService;

/// Resolves once Ctrl+C is received
pub fn shutdown_signal() -> oneshot::Receiver<()> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C signal: {}", e);
            return;
        }

        info!("Ctrl+C signal received");
        let _ = shutdown_tx.send(());
    });

    shutdown_rx
}

/// Stop the clock, wait for its task and release the service components
pub async fn graceful_shutdown(
    service: Arc<DispatchService>,
    clock_handle: tokio::task::JoinHandle<Result<()>>,
) -> Result<()> {
    info!("Starting graceful shutdown...");
    service.stop();

    let shutdown_timeout = Duration::from_secs(service.config().service.shutdown_timeout_secs);
    match timeout(shutdown_timeout, clock_handle).await {
        Ok(Ok(Ok(()))) => info!("SimulationClock stopped gracefully"),
        Ok(Ok(Err(e))) => error!("SimulationClock failed: {:#}", e),
        Ok(Err(e)) => error!("SimulationClock task failed: {}", e),
        Err(_) => warn!("SimulationClock did not stop within timeout, forcing shutdown"),
    }

    service.shutdown();
    info!("Graceful shutdown complete");
    Ok(())
}
