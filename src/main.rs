//! Behavioral Guardian - Main Entry Point
//!
//! Wires the cooperative tasks together: telemetry intake (newest-wins),
//! the analysis pipeline, the persistence writer, and the HTTP API.
//! Ctrl-C finishes the current tick, flushes state and exits.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use guardian_core::api::{self, ApiState};
use guardian_core::constants;
use guardian_core::logic::guardian::{Guardian, GuardianConfig};
use guardian_core::logic::ingest::IngestStats;
use guardian_core::logic::snapshot::SnapshotPublisher;
use guardian_core::logic::{ingest, pipeline, storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let data_dir = constants::get_data_dir();
    log::info!(
        "Starting {} v{} (data dir: {:?})...",
        constants::APP_NAME,
        constants::APP_VERSION,
        data_dir
    );

    let guardian = Arc::new(Mutex::new(Guardian::new(GuardianConfig::with_data_dir(
        data_dir,
    ))));
    let publisher = Arc::new(SnapshotPublisher::default());
    let stats = Arc::new(IngestStats::default());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (sample_tx, sample_rx) = watch::channel(None);
    let (io_tx, io_rx) = mpsc::unbounded_channel();
    let (confirm_tx, mut confirm_rx) = mpsc::unbounded_channel();

    let writer = tokio::spawn(storage::run_writer(io_rx));

    tokio::spawn(ingest::run_listener(
        constants::get_telemetry_addr(),
        sample_tx,
        stats.clone(),
        shutdown_rx.clone(),
    ));

    let pipeline_task = tokio::spawn(pipeline::run(
        guardian.clone(),
        publisher.clone(),
        sample_rx,
        stats,
        io_tx.clone(),
        confirm_tx,
        shutdown_rx.clone(),
    ));

    // Confirmation requests go to the user-facing collaborator; until one
    // connects they are at least visible in the log and via /api/v1/prompts.
    tokio::spawn(async move {
        while let Some(request) = confirm_rx.recv().await {
            log::warn!(
                "Confirmation requested [{}]: {}",
                request.command_id,
                request.command_name
            );
        }
    });

    let app = api::create_router(ApiState {
        guardian: guardian.clone(),
        publisher: publisher.clone(),
    });
    let addr: SocketAddr = constants::get_api_addr().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("HTTP API listening on http://{}", addr);

    let mut http_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Shutdown signal received");
                    let _ = shutdown_tx.send(true);
                }
                _ = http_shutdown.changed() => {}
            }
        })
        .await?;

    // The pipeline completes its tick and flushes on its way out; dropping
    // the last job sender then lets the writer drain and stop.
    let _ = pipeline_task.await;
    drop(io_tx);
    let _ = writer.await;

    log::info!("{} stopped", constants::APP_NAME);
    Ok(())
}
