use ulid::Ulid;

use crate::model::LockKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Malformed request (bad interval, wrong machine, already placed...).
    Validation(&'static str),
    /// Hard, unresolvable overlap with the named entry.
    Conflict { with: Ulid },
    /// Soft conflict with no usable relocation within the horizon.
    ResolutionFailed { entry: Ulid },
    /// Mutation blocked by a scheduler-origin lock.
    Locked { kind: LockKind, owner: String },
    NotFound(Ulid),
    /// External update citing an outdated version counter.
    StaleVersion { cited: u64, current: u64 },
    /// Duplicate lock request from the same origin.
    AlreadyLocked { kind: LockKind, owner: String },
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::Validation(msg) => write!(f, "validation failed: {msg}"),
            SchedulerError::Conflict { with } => {
                write!(f, "conflicts with committed entry: {with}")
            }
            SchedulerError::ResolutionFailed { entry } => {
                write!(f, "no free slot within horizon for entry: {entry}")
            }
            SchedulerError::Locked { kind, owner } => {
                write!(f, "blocked by {kind} lock held by {owner}")
            }
            SchedulerError::NotFound(id) => write!(f, "not found: {id}"),
            SchedulerError::StaleVersion { cited, current } => {
                write!(f, "stale version {cited}, current is {current}")
            }
            SchedulerError::AlreadyLocked { kind, owner } => {
                write!(f, "already holds a {kind} lock owned by {owner}")
            }
        }
    }
}

impl std::error::Error for SchedulerError {}
