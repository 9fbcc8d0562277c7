use ulid::Ulid;

use crate::locks::{LockState, OperationKind, compose};
use crate::model::{BlockingRule, Booking, Entry, EntryKind, Job, Machine, Ms, SchedulerLock, Span};
use crate::priority::{effective_score, rank_order};

use super::conflict::{committed_conflicts, now_ms, validate_span};
use super::resolve::{ResolutionPlan, earliest_gap, merge_overlapping, subtract_busy};
use super::{Scheduler, SchedulerError};

impl Scheduler {
    /// Committed entries overlapping `range`, in start order.
    pub async fn get_timeline(
        &self,
        machine_id: Ulid,
        range: Span,
    ) -> Result<Vec<Entry>, SchedulerError> {
        let timeline = self.timeline_for(&machine_id)?;
        let guard = timeline.read().await;
        Ok(guard.overlapping(&range).copied().collect())
    }

    /// Conflicting pairs in the committed timeline. Empty whenever the
    /// non-overlap invariant holds.
    pub async fn get_conflicts(
        &self,
        machine_id: Ulid,
    ) -> Result<Vec<(Ulid, Ulid)>, SchedulerError> {
        let timeline = self.timeline_for(&machine_id)?;
        let guard = timeline.read().await;
        Ok(committed_conflicts(guard.entries()))
    }

    /// Free spans on the machine within `range`. Informational entries do
    /// not occupy machine time.
    pub async fn get_availability(
        &self,
        machine_id: Ulid,
        range: Span,
    ) -> Result<Vec<Span>, SchedulerError> {
        validate_span(&range)?;
        let timeline = self.timeline_for(&machine_id)?;
        let guard = timeline.read().await;
        let busy: Vec<Span> = guard
            .overlapping(&range)
            .filter(|e| e.rule() != BlockingRule::None)
            .map(|e| e.span)
            .collect();
        Ok(subtract_busy(&range, &merge_overlapping(&busy)))
    }

    /// Earliest start at or after `from` with `duration` of free machine
    /// time, searching up to the configured horizon.
    pub async fn next_available_slot(
        &self,
        machine_id: Ulid,
        duration: Ms,
        from: Ms,
    ) -> Result<Option<Ms>, SchedulerError> {
        if duration <= 0 {
            return Err(SchedulerError::Validation("duration must be positive"));
        }
        let timeline = self.timeline_for(&machine_id)?;
        let guard = timeline.read().await;
        let busy: Vec<Span> = guard
            .entries()
            .iter()
            .filter(|e| e.rule() != BlockingRule::None)
            .map(|e| e.span)
            .collect();
        let window_end = from + self.cfg.horizon_ms();
        Ok(earliest_gap(&merge_overlapping(&busy), duration, from, window_end))
    }

    /// Share of `range` occupied by production work, as a 0-100 percentage.
    /// Bookings do not count toward utilization.
    pub async fn machine_utilization(
        &self,
        machine_id: Ulid,
        range: Span,
    ) -> Result<f64, SchedulerError> {
        validate_span(&range)?;
        let timeline = self.timeline_for(&machine_id)?;
        let guard = timeline.read().await;
        let occupied: Ms = guard
            .overlapping(&range)
            .filter(|e| e.kind == EntryKind::Job)
            .map(|e| e.span.end.min(range.end) - e.span.start.max(range.start))
            .sum();
        Ok(occupied as f64 / range.duration_ms() as f64 * 100.0)
    }

    /// Effective 1-100 score of a job right now.
    pub fn get_effective_priority(&self, job_id: Ulid) -> Result<u8, SchedulerError> {
        let job = self
            .jobs
            .get(&job_id)
            .map(|e| e.value().clone())
            .ok_or(SchedulerError::NotFound(job_id))?;
        Ok(effective_score(&job.priority, &self.cfg.priority, now_ms()))
    }

    /// Dry-run a job placement: the same checks and resolution as
    /// `place_job`, with zero effect on the timeline. The returned plan
    /// can simply be discarded to abandon the attempt.
    pub async fn plan_placement(
        &self,
        job_id: Ulid,
        machine_id: Ulid,
        start: Ms,
    ) -> Result<ResolutionPlan, SchedulerError> {
        let now = now_ms();
        let job = self
            .jobs
            .get(&job_id)
            .map(|e| e.value().clone())
            .ok_or(SchedulerError::NotFound(job_id))?;
        if job.machine_id != machine_id {
            return Err(SchedulerError::Validation("job requires a different machine"));
        }
        let span = Span::with_duration(start, job.duration);
        validate_span(&span)?;
        self.locks.guard(job_id, OperationKind::Move, now)?;

        let timeline = self.timeline_for(&machine_id)?;
        let guard = timeline.read().await;
        let target = Entry {
            id: job_id,
            span,
            kind: EntryKind::Job,
        };
        self.plan_for(&guard, target, now)
    }

    /// Composite lock state of a job or booking.
    pub fn lock_state(&self, entity_id: Ulid) -> Result<LockState, SchedulerError> {
        let external = match self.jobs.get(&entity_id) {
            Some(job) => job.external_lock,
            None if self.bookings.contains_key(&entity_id) => false,
            None => return Err(SchedulerError::NotFound(entity_id)),
        };
        let scheduler_lock = self.locks.active(entity_id, now_ms());
        Ok(compose(scheduler_lock.as_ref(), external))
    }

    /// All jobs with their current effective score, highest first.
    pub fn jobs_by_priority(&self) -> Vec<(Job, u8)> {
        let now = now_ms();
        let mut jobs: Vec<(Job, u8)> = self
            .jobs
            .iter()
            .map(|e| {
                let job = e.value().clone();
                let score = effective_score(&job.priority, &self.cfg.priority, now);
                (job, score)
            })
            .collect();
        jobs.sort_by(|(a, sa), (b, sb)| {
            rank_order(
                &crate::priority::Rank {
                    score: *sa,
                    due_date: a.priority.due_date,
                    id: a.id,
                },
                &crate::priority::Rank {
                    score: *sb,
                    due_date: b.priority.due_date,
                    id: b.id,
                },
            )
        });
        jobs
    }

    /// Unexpired scheduler locks held by one owner.
    pub fn locks_by_owner(&self, owner: &str) -> Vec<SchedulerLock> {
        self.locks.by_owner(owner, now_ms())
    }

    pub fn list_machines(&self) -> Vec<Machine> {
        let mut machines: Vec<Machine> = self.machines.iter().map(|e| e.value().clone()).collect();
        machines.sort_by_key(|m| m.id);
        machines
    }

    pub fn get_job(&self, job_id: Ulid) -> Option<Job> {
        self.jobs.get(&job_id).map(|e| e.value().clone())
    }

    pub fn get_booking(&self, booking_id: Ulid) -> Option<Booking> {
        self.bookings.get(&booking_id).map(|e| e.value().clone())
    }
}
