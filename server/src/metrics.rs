//! Lightweight periodic metrics.

use std::sync::Arc;
use std::time::Duration;

use cmdchat_session::ServerState;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::info;

/// Emit a metrics line at a fixed cadence until shutdown.
pub fn spawn_metrics_loop(
    state: Arc<ServerState>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval(period);
        // Skip the immediate first tick
        timer.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = timer.tick() => {
                    info!(
                        sessions = state.registry.len(),
                        rooms = state.registry.room_count(),
                        relayed = state.relayed_count(),
                        "metrics"
                    );
                }
            }
        }
    })
}
