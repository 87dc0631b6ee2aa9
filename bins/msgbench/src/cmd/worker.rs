use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use bench_worker::{LocalWorker, Worker};

use crate::config::WorkerSettings;
use crate::error::CliError;

pub async fn run(settings: WorkerSettings) -> Result<(), CliError> {
    tracing::info!(port = settings.port, "msgbench worker starting");

    let worker = Arc::new(LocalWorker::new(super::registry()));
    let token = CancellationToken::new();
    let mut server = tokio::spawn(worker_api_server::run(settings.port, worker.clone(), token.clone()));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutting down...");
        }
        served = &mut server => {
            worker.stop_all().await;
            return match served {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(CliError::Serve(e)),
                Err(e) => Err(CliError::Serve(e.to_string())),
            };
        }
    }

    token.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "worker api stopped with error"),
        Err(e) => tracing::error!(error = %e, "worker api task failed"),
    }
    worker.stop_all().await;
    tracing::info!("worker stopped");
    Ok(())
}
