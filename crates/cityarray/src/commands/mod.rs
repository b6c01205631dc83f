//! Subcommand handlers.

pub mod config_cmd;
pub mod serve;
pub mod sign;

use tokio_util::sync::CancellationToken;

/// Cancel `token` on Ctrl-C.
pub(crate) fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
        }
        token.cancel();
    });
}
