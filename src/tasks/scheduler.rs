use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, Duration};

use crate::core::state::AppState;
use crate::tasks::expiry;

/// Standalone worker entry point: re-arms pending one-shot timers, runs
/// the sweeper until a shutdown signal arrives.
pub(crate) async fn run(state: AppState) -> Result<()> {
    if let Err(err) = expiry::rearm_pending(&state).await {
        tracing::error!(error = %err, "Failed to re-arm pending auto-submit timers");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(sweeper_loop(state, shutdown_rx));

    crate::core::shutdown::shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;

    Ok(())
}

/// In-server variant: same loops, torn down with the server task.
pub(crate) async fn run_background(state: AppState) {
    if let Err(err) = expiry::rearm_pending(&state).await {
        tracing::error!(error = %err, "Failed to re-arm pending auto-submit timers");
    }

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    sweeper_loop(state, shutdown_rx).await;
}

async fn sweeper_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut tick =
        interval(Duration::from_secs(state.settings().scheduler().sweeper_interval_seconds));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = expiry::sweep_expired(&state).await {
                    tracing::error!(error = %err, "sweep_expired failed");
                }
            }
        }
    }
}
