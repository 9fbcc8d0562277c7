use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{LockKind, Ms, SchedulerLock};
use crate::scheduler::SchedulerError;

/// Kind of mutation a caller wants to perform on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Move,
    Edit,
}

/// Composite lock state of an entity. The two origins are independent:
/// each gates only its own origin's mutation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    Unlocked,
    SchedulerLocked(LockKind),
    ExternalLocked,
    Both(LockKind),
}

/// Pure lookup from the two independent lock fields into the four
/// composite states.
pub fn compose(scheduler: Option<&SchedulerLock>, external: bool) -> LockState {
    match (scheduler, external) {
        (None, false) => LockState::Unlocked,
        (Some(lock), false) => LockState::SchedulerLocked(lock.kind),
        (None, true) => LockState::ExternalLocked,
        (Some(lock), true) => LockState::Both(lock.kind),
    }
}

fn strength(kind: LockKind) -> u8 {
    match kind {
        LockKind::Arrangement => 1,
        LockKind::FullEdit => 2,
    }
}

/// Tracks scheduler-origin locks per entity. External locks live on the
/// job records; this service never consults them. Expired temporary locks
/// are treated as absent on every check (lazy expiry), so correctness
/// never depends on a background sweep.
pub struct LockingService {
    locks: DashMap<Ulid, SchedulerLock>,
}

impl Default for LockingService {
    fn default() -> Self {
        Self::new()
    }
}

impl LockingService {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// The entity's unexpired scheduler lock, if any.
    pub fn active(&self, entity_id: Ulid, now: Ms) -> Option<SchedulerLock> {
        let lock = self.locks.get(&entity_id)?.value().clone();
        if lock.is_expired(now) { None } else { Some(lock) }
    }

    /// Install a scheduler lock. Fails if an unexpired equal-or-stronger
    /// lock already exists; an arrangement lock may be upgraded to
    /// full-edit.
    pub fn lock(
        &self,
        entity_id: Ulid,
        kind: LockKind,
        ttl: Option<Ms>,
        owner: &str,
        now: Ms,
    ) -> Result<SchedulerLock, SchedulerError> {
        if let Some(existing) = self.active(entity_id, now)
            && strength(existing.kind) >= strength(kind)
        {
            return Err(SchedulerError::AlreadyLocked {
                kind: existing.kind,
                owner: existing.owner,
            });
        }
        let lock = SchedulerLock {
            id: Ulid::new(),
            entity_id,
            kind,
            expires_at: ttl.map(|t| now + t),
            owner: owner.to_string(),
            created_at: now,
        };
        self.locks.insert(entity_id, lock.clone());
        Ok(lock)
    }

    /// Clear the entity's scheduler-origin lock. Returns whether one was
    /// present (expired or not).
    pub fn unlock(&self, entity_id: Ulid) -> bool {
        self.locks.remove(&entity_id).is_some()
    }

    /// Push a temporary lock's expiry further out. Permanent locks have
    /// nothing to extend.
    pub fn extend(
        &self,
        entity_id: Ulid,
        additional: Ms,
        now: Ms,
    ) -> Result<SchedulerLock, SchedulerError> {
        let mut entry = self
            .locks
            .get_mut(&entity_id)
            .ok_or(SchedulerError::NotFound(entity_id))?;
        if entry.is_expired(now) {
            return Err(SchedulerError::NotFound(entity_id));
        }
        let Some(at) = entry.expires_at else {
            return Err(SchedulerError::Validation("lock has no expiry to extend"));
        };
        entry.expires_at = Some(at + additional);
        Ok(entry.value().clone())
    }

    /// Unexpired locks held by one owner.
    pub fn by_owner(&self, owner: &str, now: Ms) -> Vec<SchedulerLock> {
        self.locks
            .iter()
            .filter(|e| e.value().owner == owner && !e.value().is_expired(now))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Release every lock held by `owner`. Returns how many were dropped.
    pub fn unlock_all_for(&self, owner: &str) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| lock.owner != owner);
        before.saturating_sub(self.locks.len())
    }

    /// Gate a scheduler-origin mutation. Full-edit blocks both moves and
    /// edits; arrangement blocks moves only.
    pub fn guard(&self, entity_id: Ulid, op: OperationKind, now: Ms) -> Result<(), SchedulerError> {
        match self.active(entity_id, now) {
            Some(lock) if lock.kind == LockKind::FullEdit || op == OperationKind::Move => {
                Err(SchedulerError::Locked {
                    kind: lock.kind,
                    owner: lock.owner,
                })
            }
            _ => Ok(()),
        }
    }

    /// Drop all expired temporary locks. Optional housekeeping; `active`
    /// and `guard` already ignore them.
    pub fn sweep_expired(&self, now: Ms) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| !lock.is_expired(now));
        before.saturating_sub(self.locks.len())
    }

    /// All unexpired locks, for snapshots and audit.
    pub fn all_active(&self, now: Ms) -> Vec<SchedulerLock> {
        self.locks
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Restore a lock record verbatim (snapshot load).
    pub fn install(&self, lock: SchedulerLock) {
        self.locks.insert(lock.entity_id, lock);
    }

    /// Forget the entity entirely (entity removed).
    pub fn remove_entity(&self, entity_id: Ulid) {
        self.locks.remove(&entity_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_record(kind: LockKind, expires_at: Option<Ms>) -> SchedulerLock {
        SchedulerLock {
            id: Ulid::new(),
            entity_id: Ulid::new(),
            kind,
            expires_at,
            owner: "operator".into(),
            created_at: 0,
        }
    }

    #[test]
    fn compose_covers_four_states() {
        let lock = lock_record(LockKind::Arrangement, None);
        assert_eq!(compose(None, false), LockState::Unlocked);
        assert_eq!(
            compose(Some(&lock), false),
            LockState::SchedulerLocked(LockKind::Arrangement)
        );
        assert_eq!(compose(None, true), LockState::ExternalLocked);
        assert_eq!(compose(Some(&lock), true), LockState::Both(LockKind::Arrangement));
    }

    #[test]
    fn guard_matrix() {
        let svc = LockingService::new();
        let entity = Ulid::new();

        // Unlocked: everything passes.
        assert!(svc.guard(entity, OperationKind::Move, 0).is_ok());
        assert!(svc.guard(entity, OperationKind::Edit, 0).is_ok());

        // Arrangement: move blocked, edit allowed.
        svc.lock(entity, LockKind::Arrangement, None, "op", 0).unwrap();
        assert!(matches!(
            svc.guard(entity, OperationKind::Move, 0),
            Err(SchedulerError::Locked {
                kind: LockKind::Arrangement,
                ..
            })
        ));
        assert!(svc.guard(entity, OperationKind::Edit, 0).is_ok());

        // Full-edit: both blocked.
        svc.unlock(entity);
        svc.lock(entity, LockKind::FullEdit, None, "op", 0).unwrap();
        assert!(svc.guard(entity, OperationKind::Move, 0).is_err());
        assert!(svc.guard(entity, OperationKind::Edit, 0).is_err());
    }

    #[test]
    fn duplicate_lock_rejected_upgrade_allowed() {
        let svc = LockingService::new();
        let entity = Ulid::new();

        svc.lock(entity, LockKind::Arrangement, None, "alice", 0).unwrap();
        let dup = svc.lock(entity, LockKind::Arrangement, None, "bob", 0);
        assert!(matches!(dup, Err(SchedulerError::AlreadyLocked { .. })));

        // Upgrade to the stronger kind is an install, not a failure.
        let upgraded = svc.lock(entity, LockKind::FullEdit, None, "bob", 0).unwrap();
        assert_eq!(upgraded.kind, LockKind::FullEdit);

        // Downgrade attempt hits the stronger existing lock.
        let down = svc.lock(entity, LockKind::Arrangement, None, "carol", 0);
        assert!(matches!(
            down,
            Err(SchedulerError::AlreadyLocked {
                kind: LockKind::FullEdit,
                ..
            })
        ));
    }

    #[test]
    fn expired_lock_is_absent() {
        let svc = LockingService::new();
        let entity = Ulid::new();
        svc.lock(entity, LockKind::FullEdit, Some(1_000), "op", 0).unwrap();

        assert!(svc.guard(entity, OperationKind::Edit, 500).is_err());
        // Past expiry the lock no longer gates anything and a fresh lock
        // can be taken without an explicit unlock.
        assert!(svc.guard(entity, OperationKind::Edit, 1_000).is_ok());
        assert!(svc.lock(entity, LockKind::Arrangement, None, "op", 1_000).is_ok());
    }

    #[test]
    fn extend_pushes_expiry_out() {
        let svc = LockingService::new();
        let entity = Ulid::new();
        svc.lock(entity, LockKind::Arrangement, Some(1_000), "op", 0).unwrap();

        let extended = svc.extend(entity, 2_000, 500).unwrap();
        assert_eq!(extended.expires_at, Some(3_000));
        assert!(svc.guard(entity, OperationKind::Move, 2_500).is_err());

        // Permanent locks have no expiry to extend.
        let fixed = Ulid::new();
        svc.lock(fixed, LockKind::FullEdit, None, "op", 0).unwrap();
        assert!(matches!(
            svc.extend(fixed, 1_000, 0),
            Err(SchedulerError::Validation(_))
        ));

        // An expired lock is already absent.
        assert!(matches!(
            svc.extend(entity, 1_000, 5_000),
            Err(SchedulerError::NotFound(_))
        ));
    }

    #[test]
    fn owner_bulk_release() {
        let svc = LockingService::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let c = Ulid::new();
        svc.lock(a, LockKind::Arrangement, None, "alice", 0).unwrap();
        svc.lock(b, LockKind::FullEdit, None, "alice", 0).unwrap();
        svc.lock(c, LockKind::Arrangement, None, "bob", 0).unwrap();

        assert_eq!(svc.by_owner("alice", 0).len(), 2);
        assert_eq!(svc.unlock_all_for("alice"), 2);
        assert!(svc.by_owner("alice", 0).is_empty());
        assert!(svc.active(c, 0).is_some());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let svc = LockingService::new();
        let a = Ulid::new();
        let b = Ulid::new();
        svc.lock(a, LockKind::Arrangement, Some(1_000), "op", 0).unwrap();
        svc.lock(b, LockKind::Arrangement, None, "op", 0).unwrap();

        assert_eq!(svc.sweep_expired(2_000), 1);
        assert!(svc.active(a, 2_000).is_none());
        assert!(svc.active(b, 2_000).is_some());
    }
}
