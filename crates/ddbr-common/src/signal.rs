//! Shutdown signal handling
//!
//! A single future that resolves when the process receives SIGINT or
//! SIGTERM, used by the coordinator to trigger cooperative cancellation.

/// Wait for SIGINT (Ctrl-C) or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        // Installation failure leaves no way to observe the signal; treat it
        // as "never fires" rather than aborting the restore.
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
