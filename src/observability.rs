//! Metric names and logging bootstrap. The embedding process picks the
//! exporter; the core only names and records.

/// Counter: jobs placed on a timeline.
pub const PLACEMENTS_TOTAL: &str = "shopfloor_placements_total";

/// Counter: bookings committed.
pub const BOOKINGS_TOTAL: &str = "shopfloor_bookings_total";

/// Counter: placements that needed conflict resolution.
pub const RESOLUTIONS_TOTAL: &str = "shopfloor_resolutions_total";

/// Histogram: staged moves per committed resolution.
pub const RESOLUTION_MOVES: &str = "shopfloor_resolution_moves";

/// Counter: external job-source events received.
pub const EXTERNAL_UPDATES_TOTAL: &str = "shopfloor_external_updates_total";

/// Counter: expired temporary locks swept by the reaper.
pub const LOCKS_REAPED_TOTAL: &str = "shopfloor_locks_reaped_total";

/// Install a fmt subscriber filtered by `RUST_LOG`. No-op if the process
/// already installed one.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
