mod conflict;
mod error;
mod mutations;
mod queries;
mod resolve;

pub use error::SchedulerError;
pub use mutations::{Applied, JobEdit};
pub use resolve::{ResolutionPlan, StagedMove};

pub(crate) use conflict::{committed_conflicts, now_ms};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::locks::LockingService;
use crate::model::{
    ActivityType, Booking, Entry, EntryKind, HOUR_MS, Job, Machine, Ms, PriorityAttrs, Span,
};
use crate::observability;
use crate::priority::{PriorityConfig, Rank, effective_score};
use crate::timeline::MachineTimeline;

pub type SharedTimeline = Arc<RwLock<MachineTimeline>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// When false, soft conflicts are rejected instead of resolved.
    pub auto_resolve_conflicts: bool,
    /// How far past an entry's current start the resolver searches for a
    /// relocation slot.
    pub resolution_horizon_hours: i64,
    pub priority: PriorityConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            auto_resolve_conflicts: true,
            // The shop plans 30 days out.
            resolution_horizon_hours: 720,
            priority: PriorityConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub(crate) fn horizon_ms(&self) -> Ms {
        self.resolution_horizon_hours * HOUR_MS
    }
}

/// The public-facing orchestrator. Owns the machine catalog, one timeline
/// per machine, the booking/job records, and the locking service.
///
/// All mutating operations on a machine run under that machine's write
/// lock, so unrelated machines proceed fully in parallel; readers take the
/// read lock and clone results out.
pub struct Scheduler {
    pub(crate) cfg: SchedulerConfig,
    pub(crate) machines: DashMap<Ulid, Machine>,
    pub(crate) timelines: DashMap<Ulid, SharedTimeline>,
    /// Reverse lookup: entry (booking/job) id -> machine id.
    pub(crate) entity_to_machine: DashMap<Ulid, Ulid>,
    pub(crate) activity_types: DashMap<Ulid, ActivityType>,
    pub(crate) bookings: DashMap<Ulid, Booking>,
    pub(crate) jobs: DashMap<Ulid, Job>,
    pub(crate) locks: LockingService,
}

impl Scheduler {
    pub fn new(cfg: SchedulerConfig) -> Self {
        Self {
            cfg,
            machines: DashMap::new(),
            timelines: DashMap::new(),
            entity_to_machine: DashMap::new(),
            activity_types: DashMap::new(),
            bookings: DashMap::new(),
            jobs: DashMap::new(),
            locks: LockingService::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.cfg
    }

    pub(crate) fn timeline_for(&self, machine_id: &Ulid) -> Result<SharedTimeline, SchedulerError> {
        self.timelines
            .get(machine_id)
            .map(|e| e.value().clone())
            .ok_or(SchedulerError::NotFound(*machine_id))
    }

    pub(crate) fn machine_of(&self, entity_id: &Ulid) -> Result<Ulid, SchedulerError> {
        self.entity_to_machine
            .get(entity_id)
            .map(|e| *e.value())
            .ok_or(SchedulerError::NotFound(*entity_id))
    }

    /// Ranking key for an existing entry. Jobs rank by their live priority
    /// attributes; bookings carry none and rank at the neutral base.
    pub(crate) fn rank_of_entry(&self, entry: &Entry, now: Ms) -> Rank {
        let (score, due_date) = match entry.kind {
            EntryKind::Job => match self.jobs.get(&entry.id) {
                Some(job) => (
                    effective_score(&job.priority, &self.cfg.priority, now),
                    job.priority.due_date,
                ),
                None => (effective_score(&PriorityAttrs::default(), &self.cfg.priority, now), None),
            },
            EntryKind::Booking { .. } => (
                effective_score(&PriorityAttrs::default(), &self.cfg.priority, now),
                None,
            ),
        };
        Rank {
            score,
            due_date,
            id: entry.id,
        }
    }

    /// Run the resolver against the current timeline. Pure: nothing is
    /// written until `commit_plan`.
    pub(crate) fn plan_for(
        &self,
        timeline: &MachineTimeline,
        target: Entry,
        now: Ms,
    ) -> Result<ResolutionPlan, SchedulerError> {
        let mut locked = HashSet::new();
        let mut ranks = HashMap::new();
        for entry in timeline.overlapping(&target.span) {
            if entry.id == target.id {
                continue;
            }
            ranks.insert(entry.id, self.rank_of_entry(entry, now));
            if self.locks.active(entry.id, now).is_some() {
                locked.insert(entry.id);
            }
        }
        resolve::plan(
            timeline,
            target,
            self.cfg.auto_resolve_conflicts,
            self.cfg.horizon_ms(),
            &locked,
            &ranks,
        )
    }

    /// Apply a validated plan under the machine's write lock: all staged
    /// moves plus the target land as one write.
    pub(crate) fn commit_plan(&self, timeline: &mut MachineTimeline, plan: &ResolutionPlan) {
        for staged in &plan.moves {
            timeline.reschedule(staged.id, staged.to);
            self.record_entity_span(staged.id, staged.to);
            tracing::info!(
                entry = %staged.id,
                from = staged.from.start,
                to = staged.to.start,
                "relocated entry to resolve conflict"
            );
        }
        if timeline.get(plan.target.id).is_some() {
            timeline.reschedule(plan.target.id, plan.target.span);
        } else {
            timeline.insert(plan.target);
        }
        if !plan.moves.is_empty() {
            metrics::counter!(observability::RESOLUTIONS_TOTAL).increment(1);
            metrics::histogram!(observability::RESOLUTION_MOVES).record(plan.moves.len() as f64);
        }
    }

    /// Mirror a committed interval change into the owning record and bump
    /// its version counter.
    pub(crate) fn record_entity_span(&self, entity_id: Ulid, span: Span) {
        if let Some(mut booking) = self.bookings.get_mut(&entity_id) {
            booking.span = span;
            booking.version += 1;
        } else if let Some(mut job) = self.jobs.get_mut(&entity_id) {
            job.assigned = Some(span);
            job.version += 1;
        }
    }
}
