use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type in the crate.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn with_duration(start: Ms, duration: Ms) -> Self {
        Self::new(start, start + duration)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// How a booking's activity interacts with other allocations on the same
/// machine. Closed set; every call site matches exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockingRule {
    /// Any overlap is a hard conflict; nothing gets moved to make room.
    Complete,
    /// Overlap is resolvable by relocating the flexible, unlocked side.
    Flexible,
    /// Informational; coexists with anything.
    None,
}

/// A type of non-production activity that can be booked on machines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityType {
    pub id: Ulid,
    pub name: String,
    pub rule: BlockingRule,
}

impl ActivityType {
    pub fn new(name: &str, rule: BlockingRule) -> Self {
        Self {
            id: Ulid::new(),
            name: name.to_string(),
            rule,
        }
    }

    /// The shop's usual activity catalog.
    pub fn standard_set() -> Vec<ActivityType> {
        vec![
            Self::new("Machine Setup", BlockingRule::Complete),
            Self::new("Scheduled Maintenance", BlockingRule::Complete),
            Self::new("Tool Change", BlockingRule::Flexible),
            Self::new("Machine Cleaning", BlockingRule::Flexible),
            Self::new("Quality Inspection", BlockingRule::None),
            Self::new("Operator Break", BlockingRule::None),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub id: Ulid,
    pub name: String,
    pub capabilities: Vec<String>,
}

/// A non-production time reservation on a machine (setup, maintenance,
/// tool change). Movability derives from the activity type's rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub machine_id: Ulid,
    pub span: Span,
    pub activity_type: Ulid,
    pub created_by: String,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorityLevel {
    Critical,
    High,
    Normal,
    Low,
}

impl Default for PriorityLevel {
    fn default() -> Self {
        PriorityLevel::Normal
    }
}

/// Priority inputs of a job. The effective 1-100 score is always derived
/// from these plus wall-clock time, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityAttrs {
    pub level: PriorityLevel,
    pub rush: bool,
    pub customer_priority: bool,
    pub due_date: Option<Ms>,
}

/// A production job. `assigned` mirrors the job's timeline entry when the
/// job is placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Ulid,
    pub name: String,
    /// The machine this job must run on.
    pub machine_id: Ulid,
    /// Estimated run time.
    pub duration: Ms,
    pub assigned: Option<Span>,
    pub priority: PriorityAttrs,
    /// Recorded from the external job source; never gates local mutation.
    pub external_lock: bool,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockKind {
    /// Pins the interval; other fields stay editable.
    Arrangement,
    /// Blocks every mutation.
    FullEdit,
}

impl std::fmt::Display for LockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockKind::Arrangement => write!(f, "arrangement"),
            LockKind::FullEdit => write!(f, "full-edit"),
        }
    }
}

/// A scheduler-origin lock on a job or booking, independent of any lock
/// the external job source may hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerLock {
    pub id: Ulid,
    pub entity_id: Ulid,
    pub kind: LockKind,
    /// `Some` makes the lock temporary; past this instant it is treated as
    /// absent on every check.
    pub expires_at: Option<Ms>,
    pub owner: String,
    pub created_at: Ms,
}

impl SchedulerLock {
    pub fn is_temporary(&self) -> bool {
        self.expires_at.is_some()
    }

    pub fn is_expired(&self, now: Ms) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// What a timeline entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Booking { rule: BlockingRule },
    Job,
}

/// A single committed allocation on a machine's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: Ulid,
    pub span: Span,
    pub kind: EntryKind,
}

impl Entry {
    /// Effective blocking rule: bookings carry their activity's rule,
    /// production work is movable and therefore flexible.
    pub fn rule(&self) -> BlockingRule {
        match self.kind {
            EntryKind::Booking { rule } => rule,
            EntryKind::Job => BlockingRule::Flexible,
        }
    }
}

/// A job create/update event delivered by the external job source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalJobUpdate {
    pub id: Ulid,
    /// The source system's version for this record. Compared against the
    /// local counter for optimistic-concurrency reconciliation.
    pub version: u64,
    pub name: String,
    pub machine_id: Ulid,
    pub duration: Ms,
    pub priority: PriorityAttrs,
    pub external_lock: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert_eq!(Span::with_duration(100, 100), s);
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn entry_rule_follows_kind() {
        let booking = Entry {
            id: Ulid::new(),
            span: Span::new(0, 100),
            kind: EntryKind::Booking {
                rule: BlockingRule::Complete,
            },
        };
        let job = Entry {
            id: Ulid::new(),
            span: Span::new(0, 100),
            kind: EntryKind::Job,
        };
        assert_eq!(booking.rule(), BlockingRule::Complete);
        assert_eq!(job.rule(), BlockingRule::Flexible);
    }

    #[test]
    fn standard_set_covers_all_rules() {
        let set = ActivityType::standard_set();
        assert!(set.iter().any(|a| a.rule == BlockingRule::Complete));
        assert!(set.iter().any(|a| a.rule == BlockingRule::Flexible));
        assert!(set.iter().any(|a| a.rule == BlockingRule::None));
    }

    #[test]
    fn lock_expiry() {
        let lock = SchedulerLock {
            id: Ulid::new(),
            entity_id: Ulid::new(),
            kind: LockKind::Arrangement,
            expires_at: Some(1_000),
            owner: "operator".into(),
            created_at: 0,
        };
        assert!(lock.is_temporary());
        assert!(!lock.is_expired(999));
        assert!(lock.is_expired(1_000));

        let permanent = SchedulerLock {
            expires_at: None,
            ..lock
        };
        assert!(!permanent.is_temporary());
        assert!(!permanent.is_expired(Ms::MAX));
    }
}
