//! Background maintenance: retention sweep, stale-agent demotion, and
//! scheduled-job promotion.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::AppState;

/// Agents are considered stale after this many seconds without heartbeat
/// (three missed 30 s heartbeats).
pub const AGENT_GRACE_SECS: i64 = 90;

/// Default seconds between maintenance passes.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Run maintenance until `shutdown` flips to true.
pub async fn run(state: Arc<AppState>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    info!(
        "Maintenance sweeper running every {}s",
        interval.as_secs()
    );
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_once(&state).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Maintenance sweeper stopping");
                    return;
                }
            }
        }
    }
}

/// One maintenance pass. Failures are logged, never fatal.
pub async fn run_once(state: &AppState) {
    match state.queue.promote_due().await {
        Ok(0) => {}
        Ok(n) => info!("Promoted {} due scheduled jobs", n),
        Err(err) => warn!("Scheduled-job promotion failed: {}", err),
    }

    match state.registry.mark_stale_offline(AGENT_GRACE_SECS).await {
        Ok(0) => {}
        Ok(n) => info!("Marked {} stale agents offline", n),
        Err(err) => warn!("Stale-agent sweep failed: {}", err),
    }

    if let Err(err) = state.sweeper.sweep_all().await {
        warn!("Retention sweep failed: {}", err);
    }
}
