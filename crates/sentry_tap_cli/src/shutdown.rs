//! Graceful shutdown handling.

use sentry_tap::ShutdownFlag;

/// Set up the Ctrl+C handler for graceful shutdown.
///
/// The first signal requests a cooperative stop: in-flight page fetches are
/// abandoned and no bookmark advances. A second signal force-quits.
pub(crate) fn setup_shutdown_handler(flag: ShutdownFlag) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");

        tracing::warn!("shutdown requested, abandoning in-flight streams (Ctrl+C again to force quit)");
        flag.request();

        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install second Ctrl+C handler");

        std::process::exit(130);
    });
}
