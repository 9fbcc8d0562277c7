use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::model::{ActivityType, Booking, Entry, EntryKind, Job, Machine, SchedulerLock};
use crate::scheduler::{Scheduler, SchedulerConfig, SchedulerError, committed_conflicts, now_ms};
use crate::timeline::MachineTimeline;

/// The plain-record bundle exchanged with the persistence collaborator.
/// Timelines are not serialized; they are derivable from the bookings and
/// the jobs' assigned intervals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub machines: Vec<Machine>,
    pub activity_types: Vec<ActivityType>,
    pub bookings: Vec<Booking>,
    pub jobs: Vec<Job>,
    pub locks: Vec<SchedulerLock>,
}

impl Scheduler {
    /// Rebuild a scheduler from persisted records. Rejects a snapshot
    /// whose committed entries violate the non-overlap invariant.
    pub fn from_snapshot(
        cfg: SchedulerConfig,
        snapshot: Snapshot,
    ) -> Result<Scheduler, SchedulerError> {
        let sched = Scheduler::new(cfg);

        for machine in snapshot.machines {
            sched.timelines.insert(
                machine.id,
                Arc::new(RwLock::new(MachineTimeline::new(machine.id))),
            );
            sched.machines.insert(machine.id, machine);
        }
        for activity in snapshot.activity_types {
            sched.activity_types.insert(activity.id, activity);
        }

        // We are the sole owner of these Arcs during restore, so try_write
        // always succeeds instantly.
        for booking in snapshot.bookings {
            let rule = sched
                .activity_types
                .get(&booking.activity_type)
                .map(|a| a.rule)
                .ok_or(SchedulerError::NotFound(booking.activity_type))?;
            let timeline = sched.timeline_for(&booking.machine_id)?;
            timeline
                .try_write()
                .expect("restore: uncontended write")
                .insert(Entry {
                    id: booking.id,
                    span: booking.span,
                    kind: EntryKind::Booking { rule },
                });
            sched.entity_to_machine.insert(booking.id, booking.machine_id);
            sched.bookings.insert(booking.id, booking);
        }
        for job in snapshot.jobs {
            if !sched.machines.contains_key(&job.machine_id) {
                return Err(SchedulerError::NotFound(job.machine_id));
            }
            if let Some(span) = job.assigned {
                let timeline = sched.timeline_for(&job.machine_id)?;
                timeline
                    .try_write()
                    .expect("restore: uncontended write")
                    .insert(Entry {
                        id: job.id,
                        span,
                        kind: EntryKind::Job,
                    });
                sched.entity_to_machine.insert(job.id, job.machine_id);
            }
            sched.jobs.insert(job.id, job);
        }
        for lock in snapshot.locks {
            sched.locks.install(lock);
        }

        for entry in sched.timelines.iter() {
            let guard = entry.value().try_read().expect("restore: uncontended read");
            if let Some(&(a, _)) = committed_conflicts(guard.entries()).first() {
                return Err(SchedulerError::Conflict { with: a });
            }
        }

        Ok(sched)
    }

    /// Dump all records for the persistence collaborator. Expired
    /// temporary locks are dropped on the way out.
    pub fn snapshot(&self) -> Snapshot {
        let mut machines: Vec<Machine> = self.machines.iter().map(|e| e.value().clone()).collect();
        machines.sort_by_key(|m| m.id);
        let mut activity_types: Vec<ActivityType> =
            self.activity_types.iter().map(|e| e.value().clone()).collect();
        activity_types.sort_by_key(|a| a.id);
        let mut bookings: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        bookings.sort_by_key(|b| b.id);
        let mut jobs: Vec<Job> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by_key(|j| j.id);
        let mut locks = self.locks.all_active(now_ms());
        locks.sort_by_key(|l| l.id);

        Snapshot {
            machines,
            activity_types,
            bookings,
            jobs,
            locks,
        }
    }
}
