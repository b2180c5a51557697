//! Interrupt handling for the in-flight transfer.
//!
//! SIGINT/SIGTERM kill the rsync process. No remote cleanup is attempted:
//! the incomplete snapshot directory is left behind for the next run's
//! prepare step to discard.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), cancelling transfer");
        }
        _ = terminate => {
            info!("Received SIGTERM, cancelling transfer");
        }
    }
}

/// Spawn a watcher that cancels the returned token on the first signal.
pub fn cancel_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let watcher = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        watcher.cancel();
    });
    token
}
