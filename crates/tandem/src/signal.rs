//! Termination-signal handling for the launcher process.

/// Wait for a stop request (SIGINT, or SIGTERM on unix).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This only happens when the
/// tokio runtime is misconfigured, which is an unrecoverable startup error
/// worth failing fast on.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler - is tokio runtime configured correctly?");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler - is tokio runtime configured correctly?")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, stopping children...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, stopping children...");
        }
    }
}
