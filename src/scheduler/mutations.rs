use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::locks::OperationKind;
use crate::model::{
    ActivityType, Booking, Entry, EntryKind, ExternalJobUpdate, Job, LockKind, Machine, Ms,
    PriorityAttrs, SchedulerLock, Span,
};
use crate::observability;
use crate::timeline::MachineTimeline;

use super::conflict::{now_ms, validate_span};
use super::{Scheduler, SchedulerError};

/// Patch for non-interval job fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobEdit {
    pub name: Option<String>,
    pub priority: Option<PriorityAttrs>,
}

/// What an external update did to local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    /// The cited version is already current; nothing changed.
    Noop,
}

impl Scheduler {
    pub fn add_machine(&self, name: &str, capabilities: Vec<String>) -> Machine {
        let machine = Machine {
            id: Ulid::new(),
            name: name.to_string(),
            capabilities,
        };
        self.timelines.insert(
            machine.id,
            Arc::new(RwLock::new(MachineTimeline::new(machine.id))),
        );
        self.machines.insert(machine.id, machine.clone());
        machine
    }

    /// Remove a machine. Refused while anything is scheduled on it or any
    /// job still requires it.
    pub async fn remove_machine(&self, machine_id: Ulid) -> Result<(), SchedulerError> {
        let timeline = self.timeline_for(&machine_id)?;
        {
            let guard = timeline.read().await;
            if !guard.is_empty() {
                return Err(SchedulerError::Validation("machine timeline is not empty"));
            }
        }
        if self.jobs.iter().any(|j| j.machine_id == machine_id) {
            return Err(SchedulerError::Validation("machine is still required by jobs"));
        }
        self.timelines.remove(&machine_id);
        self.machines.remove(&machine_id);
        Ok(())
    }

    pub fn register_activity_type(&self, activity: ActivityType) -> Result<(), SchedulerError> {
        if self.activity_types.contains_key(&activity.id) {
            return Err(SchedulerError::Validation("activity type already registered"));
        }
        self.activity_types.insert(activity.id, activity);
        Ok(())
    }

    /// Create an unplaced job bound to its required machine.
    pub fn create_job(
        &self,
        machine_id: Ulid,
        name: &str,
        duration: Ms,
        priority: PriorityAttrs,
    ) -> Result<Job, SchedulerError> {
        if !self.machines.contains_key(&machine_id) {
            return Err(SchedulerError::NotFound(machine_id));
        }
        if duration <= 0 {
            return Err(SchedulerError::Validation("job duration must be positive"));
        }
        let job = Job {
            id: Ulid::new(),
            name: name.to_string(),
            machine_id,
            duration,
            assigned: None,
            priority,
            external_lock: false,
            version: 1,
        };
        self.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    /// Place an unplaced job at `start` on its required machine, resolving
    /// soft conflicts or rejecting. Returns the committed interval.
    pub async fn place_job(
        &self,
        job_id: Ulid,
        machine_id: Ulid,
        start: Ms,
    ) -> Result<Span, SchedulerError> {
        let now = now_ms();
        let job = self
            .jobs
            .get(&job_id)
            .map(|e| e.value().clone())
            .ok_or(SchedulerError::NotFound(job_id))?;
        if job.machine_id != machine_id {
            return Err(SchedulerError::Validation("job requires a different machine"));
        }
        if job.assigned.is_some() {
            return Err(SchedulerError::Validation("job is already placed; move it instead"));
        }
        let span = Span::with_duration(start, job.duration);
        validate_span(&span)?;
        self.locks.guard(job_id, OperationKind::Move, now)?;

        let timeline = self.timeline_for(&machine_id)?;
        let mut guard = timeline.write().await;
        let target = Entry {
            id: job_id,
            span,
            kind: EntryKind::Job,
        };
        let plan = self.plan_for(&guard, target, now)?;
        self.commit_plan(&mut guard, &plan);

        // Record updates land before the machine lock is released so the
        // whole resolution becomes visible at once.
        self.entity_to_machine.insert(job_id, machine_id);
        if let Some(mut record) = self.jobs.get_mut(&job_id) {
            record.assigned = Some(span);
            record.version += 1;
        }
        drop(guard);
        metrics::counter!(observability::PLACEMENTS_TOTAL).increment(1);
        info!(job = %job_id, machine = %machine_id, start, "placed job");
        Ok(span)
    }

    /// Book a non-production activity, resolving soft conflicts or
    /// rejecting per the activity's blocking rule.
    pub async fn create_booking(
        &self,
        machine_id: Ulid,
        activity_type_id: Ulid,
        span: Span,
        created_by: &str,
    ) -> Result<Booking, SchedulerError> {
        let now = now_ms();
        validate_span(&span)?;
        let activity = self
            .activity_types
            .get(&activity_type_id)
            .map(|e| e.value().clone())
            .ok_or(SchedulerError::NotFound(activity_type_id))?;

        let timeline = self.timeline_for(&machine_id)?;
        let mut guard = timeline.write().await;
        let id = Ulid::new();
        let target = Entry {
            id,
            span,
            kind: EntryKind::Booking {
                rule: activity.rule,
            },
        };
        let plan = self.plan_for(&guard, target, now)?;
        self.commit_plan(&mut guard, &plan);

        let booking = Booking {
            id,
            machine_id,
            span,
            activity_type: activity_type_id,
            created_by: created_by.to_string(),
            version: 1,
        };
        self.bookings.insert(id, booking.clone());
        self.entity_to_machine.insert(id, machine_id);
        drop(guard);
        metrics::counter!(observability::BOOKINGS_TOTAL).increment(1);
        info!(booking = %id, machine = %machine_id, activity = %activity.name, "created booking");
        Ok(booking)
    }

    /// Move a committed entry (booking or job placement) to a new interval
    /// on its machine.
    pub async fn move_entry(&self, entity_id: Ulid, new_span: Span) -> Result<(), SchedulerError> {
        let now = now_ms();
        validate_span(&new_span)?;
        let machine_id = self.machine_of(&entity_id)?;
        self.locks.guard(entity_id, OperationKind::Move, now)?;

        let timeline = self.timeline_for(&machine_id)?;
        let mut guard = timeline.write().await;
        let current = guard
            .get(entity_id)
            .copied()
            .ok_or(SchedulerError::NotFound(entity_id))?;
        let target = Entry {
            span: new_span,
            ..current
        };
        let plan = self.plan_for(&guard, target, now)?;
        self.commit_plan(&mut guard, &plan);
        self.record_entity_span(entity_id, new_span);
        drop(guard);

        info!(entry = %entity_id, start = new_span.start, "moved entry");
        Ok(())
    }

    /// Edit non-interval job fields. Blocked by a full-edit lock; allowed
    /// under an arrangement lock.
    pub fn edit_job(&self, job_id: Ulid, edit: JobEdit) -> Result<Job, SchedulerError> {
        let now = now_ms();
        if !self.jobs.contains_key(&job_id) {
            return Err(SchedulerError::NotFound(job_id));
        }
        self.locks.guard(job_id, OperationKind::Edit, now)?;
        let mut record = self
            .jobs
            .get_mut(&job_id)
            .ok_or(SchedulerError::NotFound(job_id))?;
        if let Some(name) = edit.name {
            record.name = name;
        }
        if let Some(priority) = edit.priority {
            record.priority = priority;
        }
        record.version += 1;
        Ok(record.clone())
    }

    /// Remove a job entirely (shipped or cancelled), releasing its
    /// placement and any lock record.
    pub async fn remove_job(&self, job_id: Ulid) -> Result<(), SchedulerError> {
        let now = now_ms();
        let job = self
            .jobs
            .get(&job_id)
            .map(|e| e.value().clone())
            .ok_or(SchedulerError::NotFound(job_id))?;
        self.locks.guard(job_id, OperationKind::Edit, now)?;

        if job.assigned.is_some() {
            let timeline = self.timeline_for(&job.machine_id)?;
            let mut guard = timeline.write().await;
            guard.remove(job_id);
        }
        self.entity_to_machine.remove(&job_id);
        self.locks.remove_entity(job_id);
        self.jobs.remove(&job_id);
        info!(job = %job_id, "removed job");
        Ok(())
    }

    pub async fn cancel_booking(&self, booking_id: Ulid) -> Result<(), SchedulerError> {
        let now = now_ms();
        let booking = self
            .bookings
            .get(&booking_id)
            .map(|e| e.value().clone())
            .ok_or(SchedulerError::NotFound(booking_id))?;
        self.locks.guard(booking_id, OperationKind::Edit, now)?;

        let timeline = self.timeline_for(&booking.machine_id)?;
        let mut guard = timeline.write().await;
        guard.remove(booking_id);
        self.entity_to_machine.remove(&booking_id);
        self.locks.remove_entity(booking_id);
        self.bookings.remove(&booking_id);
        drop(guard);
        info!(booking = %booking_id, "cancelled booking");
        Ok(())
    }

    /// Install a scheduler-origin lock on a job or booking. `ttl` makes
    /// the lock temporary.
    pub fn set_lock(
        &self,
        entity_id: Ulid,
        kind: LockKind,
        ttl: Option<Ms>,
        owner: &str,
    ) -> Result<SchedulerLock, SchedulerError> {
        if !self.jobs.contains_key(&entity_id) && !self.bookings.contains_key(&entity_id) {
            return Err(SchedulerError::NotFound(entity_id));
        }
        self.locks.lock(entity_id, kind, ttl, owner, now_ms())
    }

    /// Release the scheduler-origin lock. The external flag is untouched.
    pub fn release_lock(&self, entity_id: Ulid) -> bool {
        self.locks.unlock(entity_id)
    }

    /// Push a temporary scheduler lock's expiry further out.
    pub fn extend_lock(
        &self,
        entity_id: Ulid,
        additional: Ms,
    ) -> Result<SchedulerLock, SchedulerError> {
        self.locks.extend(entity_id, additional, now_ms())
    }

    /// Release every scheduler lock held by `owner` (an operator logging
    /// off). Returns how many were dropped.
    pub fn release_locks_for(&self, owner: &str) -> usize {
        self.locks.unlock_all_for(owner)
    }

    /// Reconcile a create/update event from the external job source.
    ///
    /// Versions compare against the local counter: older is stale, equal
    /// is an idempotent no-op, newer is applied (still passing the
    /// scheduler-lock guard like any local edit). A full-edit lock is
    /// never overridden to satisfy the source.
    pub fn apply_external_update(
        &self,
        update: ExternalJobUpdate,
    ) -> Result<Applied, SchedulerError> {
        let now = now_ms();
        metrics::counter!(observability::EXTERNAL_UPDATES_TOTAL).increment(1);

        let Some(job) = self.jobs.get(&update.id).map(|e| e.value().clone()) else {
            if !self.machines.contains_key(&update.machine_id) {
                return Err(SchedulerError::NotFound(update.machine_id));
            }
            if update.duration <= 0 {
                return Err(SchedulerError::Validation("job duration must be positive"));
            }
            self.jobs.insert(
                update.id,
                Job {
                    id: update.id,
                    name: update.name,
                    machine_id: update.machine_id,
                    duration: update.duration,
                    assigned: None,
                    priority: update.priority,
                    external_lock: update.external_lock,
                    version: update.version,
                },
            );
            info!(job = %update.id, version = update.version, "created job from external source");
            return Ok(Applied::Created);
        };

        if update.version < job.version {
            return Err(SchedulerError::StaleVersion {
                cited: update.version,
                current: job.version,
            });
        }
        if update.version == job.version {
            return Ok(Applied::Noop);
        }
        self.locks.guard(update.id, OperationKind::Edit, now)?;
        if job.assigned.is_some() && (update.machine_id != job.machine_id || update.duration != job.duration)
        {
            return Err(SchedulerError::Validation(
                "external update cannot reshape a placed job",
            ));
        }
        if update.duration <= 0 {
            return Err(SchedulerError::Validation("job duration must be positive"));
        }
        if !self.machines.contains_key(&update.machine_id) {
            return Err(SchedulerError::NotFound(update.machine_id));
        }

        let mut record = self
            .jobs
            .get_mut(&update.id)
            .ok_or(SchedulerError::NotFound(update.id))?;
        record.name = update.name;
        record.machine_id = update.machine_id;
        record.duration = update.duration;
        record.priority = update.priority;
        record.external_lock = update.external_lock;
        record.version = update.version;
        info!(job = %update.id, version = update.version, "applied external update");
        Ok(Applied::Updated)
    }
}
