use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dicomstore_core::config::{
    frame_size_policy_from_env_value, max_job_attempts_from_env_value,
    max_payload_bytes_from_env_value, worker_poll_interval_from_env_value,
};
use dicomstore_core::constants::DEFAULT_DATA_DIR;
use dicomstore_core::{CoreConfig, Services};

/// Main entry point for the dicomstore server
///
/// Runs the REST API and the background update worker in one process, sharing one set of
/// services so that retrieves, stores and updates see the same index and locks.
///
/// # Environment Variables
/// - `DICOMSTORE_DATA_DIR`: root of blobs, index and operation records (default: "dicom_data")
/// - `DICOMSTORE_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `DICOMSTORE_MAX_PAYLOAD_BYTES`: largest payload retrieved or rendered (default: 100 MiB)
/// - `DICOMSTORE_FRAME_SIZE_POLICY`: `frame` or `instance` (default: "frame")
/// - `DICOMSTORE_WORKER_POLL_SECS`: worker poll interval (default: 5)
/// - `DICOMSTORE_MAX_JOB_ATTEMPTS`: job-fatal failures before a job fails (default: 3)
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dicomstore=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config_from_env()?;
    let rest_addr =
        std::env::var("DICOMSTORE_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let services = Services::open(&cfg)?;
    let worker = services.worker();
    let max_body_bytes = usize::try_from(cfg.max_payload_bytes()).unwrap_or(usize::MAX);
    let rest_app = api_rest::router(services, max_body_bytes);

    tracing::info!("++ Starting dicomstore REST on {}", rest_addr);
    tracing::info!("++ Data directory {}", cfg.data_dir().display());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;

    let rest_server = async move {
        axum::serve(listener, rest_app)
            .with_graceful_shutdown(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("failed to listen for shutdown signal: {}", e);
                }
                tracing::info!("shutdown requested");
                let _ = shutdown_tx.send(true);
            })
            .await
    };
    let update_worker = worker.run(shutdown_rx);

    let (rest_result, ()) = tokio::join!(rest_server, update_worker);
    rest_result?;

    Ok(())
}

/// Resolves configuration once at startup.
fn config_from_env() -> anyhow::Result<CoreConfig> {
    let data_dir = std::env::var("DICOMSTORE_DATA_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DATA_DIR.into());

    Ok(CoreConfig::new(
        PathBuf::from(data_dir),
        max_payload_bytes_from_env_value(std::env::var("DICOMSTORE_MAX_PAYLOAD_BYTES").ok())?,
        frame_size_policy_from_env_value(std::env::var("DICOMSTORE_FRAME_SIZE_POLICY").ok())?,
        worker_poll_interval_from_env_value(std::env::var("DICOMSTORE_WORKER_POLL_SECS").ok())?,
        max_job_attempts_from_env_value(std::env::var("DICOMSTORE_MAX_JOB_ATTEMPTS").ok())?,
    )?)
}
