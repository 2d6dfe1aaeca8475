use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use scheduler_module::{init_tracing, run_service, BoxError, TrackerConfig};
use tokio::task;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let config = TrackerConfig::from_env().map_err(|err| {
        error!("invalid configuration: {}", err);
        err
    })?;
    info!(
        "starting task mail tracker: ingestion every {:?}, reminder sweep every {:?}, bot {}",
        config.ingestion_interval, config.reminder_sweep_interval, config.bot_email
    );

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("failed to listen for shutdown signal: {}", err);
                return;
            }
            info!("shutdown requested, finishing current runs");
            stop.store(true, Ordering::Relaxed);
        });
    }

    task::spawn_blocking(move || run_service(config, stop))
        .await
        .map_err(|err| -> BoxError { err.into() })??;
    info!("task mail tracker stopped");
    Ok(())
}
