//! Grid Dispatch Service
//!
//! Runs a simulated market area whose devices can be taken over by external
//! clients and aggregators. Stops on Ctrl+C or once the configured number of
//! slots has been simulated.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use dispatch_service::{
    config::validate_config, graceful_shutdown, initialize_logging_with_config, load_configuration,
    shutdown_signal, DispatchService,
};

#[derive(Parser)]
#[command(name = "grid-dispatch")]
#[command(about = "Simulated market area with externally controlled devices")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after this many slots
    #[arg(short, long)]
    slots: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_configuration(cli.config.as_deref())?;
    if let Some(slots) = cli.slots {
        config.clock.max_slots = Some(slots);
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    validate_config(&config)?;

    initialize_logging_with_config(&config.logging.level, &config.logging.format)?;
    info!("Starting Grid Dispatch Service v{}", env!("CARGO_PKG_VERSION"));

    let service = Arc::new(DispatchService::new(config).context("Failed to initialize service")?);

    let mut clock_handle = {
        let service = service.clone();
        tokio::spawn(async move { service.run().await })
    };

    info!("Grid Dispatch Service is running. Press Ctrl+C to shutdown gracefully.");
    let slot_limit_reached = tokio::select! {
        _ = shutdown_signal() => false,
        finished = &mut clock_handle => {
            finished.context("SimulationClock task panicked")??;
            true
        }
    };

    if slot_limit_reached {
        info!("Slot limit reached");
        service.shutdown();
    } else {
        info!("Shutdown signal received. Initiating graceful shutdown...");
        graceful_shutdown(service, clock_handle).await?;
    }

    info!("Grid Dispatch Service shutdown complete");
    Ok(())
}
