//! Bookmarks worker entry point.

use std::error::Error;

use bookmarks_worker::app::{Backends, Pipeline};
use bookmarks_worker::config::WorkerConfig;
use bookmarks_worker::{shutdown, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    telemetry::init();

    let config = WorkerConfig::load()?;
    tracing::info!(
        queue = %config.worker.queue,
        backend = ?config.backend,
        "Starting bookmarks worker"
    );

    let backends = Backends::connect(&config).await?;
    let pipeline = Pipeline::assemble(&config, backends)?;
    let stop = shutdown::shutdown_signal()?;
    pipeline.start().await?;

    let signal = stop.await;
    tracing::info!(?signal, "Shutdown signal received");
    pipeline.shutdown().await;

    Ok(())
}
