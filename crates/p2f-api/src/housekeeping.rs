//! Periodic maintenance of retained renders and in-memory state.

use std::time::Duration;

use metrics::counter;
use p2f_render::cleanup_old_renders;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::metrics::names;
use crate::state::AppState;

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HousekeepingReport {
    pub renders_removed: usize,
    pub freed_bytes: u64,
    pub cache_entries_removed: usize,
    pub idle_clients_purged: usize,
}

/// Run one pass: retention sweep, durable-cache expiry, limiter purge.
///
/// Failures of individual steps are logged and do not stop the others.
pub async fn run_once(state: &AppState) -> HousekeepingReport {
    let mut report = HousekeepingReport::default();

    match cleanup_old_renders(state.config.media_root(), &state.config.retention).await {
        Ok(retention) => {
            report.renders_removed = retention.removed();
            report.freed_bytes = retention.freed_bytes;
        }
        Err(e) => warn!(error = %e, "Retention sweep failed"),
    }

    match state.video_cache.cleanup_expired().await {
        Ok(removed) => report.cache_entries_removed = removed,
        Err(e) => warn!(error = %e, "Video cache cleanup failed"),
    }

    report.idle_clients_purged = state.limiter.purge_idle();

    counter!(names::HOUSEKEEPING_RUNS_TOTAL).increment(1);
    debug!(?report, "Housekeeping pass finished");
    report
}

/// Run [`run_once`] every `interval` until the task is dropped.
pub async fn run(state: AppState, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "Starting housekeeping task");

    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        run_once(&state).await;
    }
}
