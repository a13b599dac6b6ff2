//! Signal handling for graceful shutdown.

use tracing::{info, warn};

/// Wait for a shutdown signal (SIGINT, SIGTERM, or SIGQUIT on Unix).
///
/// If the handlers cannot be installed the future never resolves, so a run
/// proceeds without graceful cancellation instead of aborting.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let handlers = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
    );
    let (Ok(mut sigint), Ok(mut sigterm), Ok(mut sigquit)) = handlers else {
        warn!("Failed to install signal handlers, graceful shutdown disabled");
        return std::future::pending().await;
    };

    tokio::select! {
        _ = sigint.recv() => {
            info!(message = "Signal received.", signal = "SIGINT");
        }
        _ = sigterm.recv() => {
            info!(message = "Signal received.", signal = "SIGTERM");
        }
        _ = sigquit.recv() => {
            info!(message = "Signal received.", signal = "SIGQUIT");
        }
    }
}

/// Wait for Ctrl-C on non-Unix platforms.
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!(message = "Signal received.", signal = "CTRL_C");
    } else {
        warn!("Failed to install Ctrl-C handler, graceful shutdown disabled");
        std::future::pending::<()>().await;
    }
}
