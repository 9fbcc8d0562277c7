use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::observability;
use crate::scheduler::{Scheduler, now_ms};

/// Background task that periodically drops expired temporary locks.
/// Purely housekeeping: `guard` already treats expired locks as absent.
pub async fn run_lock_reaper(scheduler: Arc<Scheduler>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let swept = scheduler.locks.sweep_expired(now_ms());
        if swept > 0 {
            metrics::counter!(observability::LOCKS_REAPED_TOTAL).increment(swept as u64);
            info!(swept, "released expired scheduler locks");
        }
    }
}
