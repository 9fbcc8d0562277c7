//! Machine-time allocation core for a production shop.
//!
//! Arbitrates finite per-machine time between production jobs and
//! non-production bookings: per-machine timelines with non-overlap
//! invariants, a three-way blocking-rule model, dual scheduler/external
//! locking, and priority-ordered, stage-then-commit conflict resolution.
//!
//! Rendering, NC-file analysis, transport, and storage formats are the
//! embedding application's concern; this crate only owns the allocation
//! state machine.

pub mod locks;
pub mod model;
pub mod observability;
pub mod priority;
pub mod reaper;
pub mod scheduler;
pub mod snapshot;
pub mod timeline;

pub use scheduler::{
    Applied, JobEdit, ResolutionPlan, Scheduler, SchedulerConfig, SchedulerError, StagedMove,
};
pub use snapshot::Snapshot;
