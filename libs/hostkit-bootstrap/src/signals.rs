use anyhow::Result;
use hostkit::ServiceOwner;
use tokio::signal;

/// Reason recorded on the service exit when a termination signal arrives.
pub const SIGNAL_REASON: &str = "signal received";

/// Wait for termination signals (Ctrl+C, SIGTERM)
pub async fn wait_for_shutdown() -> Result<()> {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(%e, "Failed to install Ctrl+C handler");
            return Err(e);
        }
        Ok(())
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal_handler) => {
                signal_handler.recv().await;
                Ok(())
            }
            Err(e) => {
                tracing::error!(%e, "Failed to install SIGTERM handler");
                Err(e)
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<std::io::Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            tracing::info!("Received Ctrl+C signal");
        },
        result = terminate => {
            result?;
            tracing::info!("Received SIGTERM signal");
        },
    }

    Ok(())
}

/// Stop `owner` with exit code 0 once a termination signal arrives.
///
/// Returns when the owner has been stopped, or immediately after logging if
/// the signal handlers could not be installed.
pub async fn stop_on_signal(owner: ServiceOwner) {
    if let Err(e) = wait_for_shutdown().await {
        tracing::error!(error = %e, "signal handling unavailable; stop the service another way");
        return;
    }
    tracing::info!(service = owner.name(), "Shutdown signal received, initiating graceful shutdown");
    if owner.stop(SIGNAL_REASON, 0).await.is_none() {
        tracing::debug!("service was already stopping");
    }
}
