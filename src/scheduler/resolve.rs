use std::collections::{HashMap, HashSet};

use ulid::Ulid;

use crate::model::{Entry, Ms, Span};
use crate::priority::{Rank, rank_order};
use crate::timeline::MachineTimeline;

use super::SchedulerError;
use super::conflict::{ConflictClass, classify, committed_conflicts};

/// One staged relocation of an existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedMove {
    pub id: Ulid,
    pub from: Span,
    pub to: Span,
}

/// The outcome of planning a placement: the target entry plus the moves
/// that must accompany it. Nothing is written until the plan is committed;
/// discarding the plan has zero effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionPlan {
    pub target: Entry,
    pub moves: Vec<StagedMove>,
}

/// Plan a placement against a machine timeline.
///
/// Overlapping entries are partitioned by conflict class: any hard
/// conflict aborts the request; soft conflicts are resolved by relocating
/// the conflicting entries, lowest effective priority first, each to the
/// earliest free gap at or after its current start within the horizon.
/// The staged result is re-validated before it is returned. The function
/// never mutates the timeline; repeated calls with unchanged input yield
/// identical plans.
pub fn plan(
    timeline: &MachineTimeline,
    target: Entry,
    auto_resolve: bool,
    horizon: Ms,
    locked: &HashSet<Ulid>,
    ranks: &HashMap<Ulid, Rank>,
) -> Result<ResolutionPlan, SchedulerError> {
    let mut staging: Vec<Entry> = timeline
        .entries()
        .iter()
        .filter(|e| e.id != target.id)
        .copied()
        .collect();

    let mut soft: Vec<Entry> = Vec::new();
    for entry in &staging {
        if !entry.span.overlaps(&target.span) {
            continue;
        }
        match classify(target.rule(), entry.rule()) {
            ConflictClass::Hard => return Err(SchedulerError::Conflict { with: entry.id }),
            ConflictClass::Soft => soft.push(*entry),
            ConflictClass::NoConflict => {}
        }
    }

    if soft.is_empty() {
        insert_sorted(&mut staging, target);
        revalidate(&staging)?;
        return Ok(ResolutionPlan {
            target,
            moves: Vec::new(),
        });
    }
    if !auto_resolve {
        return Err(SchedulerError::Conflict { with: soft[0].id });
    }
    if let Some(entry) = soft.iter().find(|e| locked.contains(&e.id)) {
        // Soft conflict, but the conflicting side may never be moved.
        return Err(SchedulerError::ResolutionFailed { entry: entry.id });
    }

    // Lowest-priority entries yield first: exact reverse of the candidate
    // total order, so the sequence is deterministic.
    soft.sort_by(|a, b| rank_order(&rank_for(ranks, a), &rank_for(ranks, b)).reverse());

    let displaced: HashSet<Ulid> = soft.iter().map(|e| e.id).collect();
    staging.retain(|e| !displaced.contains(&e.id));
    insert_sorted(&mut staging, target);

    let mut moves = Vec::with_capacity(soft.len());
    for candidate in &soft {
        let duration = candidate.span.duration_ms();
        let busy: Vec<Span> = staging
            .iter()
            .filter(|e| classify(candidate.rule(), e.rule()) != ConflictClass::NoConflict)
            .map(|e| e.span)
            .collect();
        let busy = merge_overlapping(&busy);
        let window_end = candidate.span.start + horizon;
        let Some(slot) = earliest_gap(&busy, duration, candidate.span.start, window_end) else {
            return Err(SchedulerError::ResolutionFailed { entry: candidate.id });
        };
        let to = Span::with_duration(slot, duration);
        moves.push(StagedMove {
            id: candidate.id,
            from: candidate.span,
            to,
        });
        insert_sorted(&mut staging, Entry { span: to, ..*candidate });
    }

    revalidate(&staging)?;
    Ok(ResolutionPlan { target, moves })
}

fn rank_for(ranks: &HashMap<Ulid, Rank>, entry: &Entry) -> Rank {
    ranks.get(&entry.id).copied().unwrap_or(Rank {
        score: 50,
        due_date: None,
        id: entry.id,
    })
}

fn insert_sorted(entries: &mut Vec<Entry>, entry: Entry) {
    let pos = entries.partition_point(|e| e.span.start < entry.span.start);
    entries.insert(pos, entry);
}

fn revalidate(staging: &[Entry]) -> Result<(), SchedulerError> {
    match committed_conflicts(staging).first() {
        Some(&(a, _)) => Err(SchedulerError::ResolutionFailed { entry: a }),
        None => Ok(()),
    }
}

/// Merge sorted overlapping/adjacent spans into disjoint spans.
pub(super) fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Earliest start `>= from` where a `duration`-long slot fits between the
/// merged busy spans and still ends by `window_end`.
pub(super) fn earliest_gap(busy: &[Span], duration: Ms, from: Ms, window_end: Ms) -> Option<Ms> {
    let mut cursor = from;
    for b in busy {
        if b.end <= cursor {
            continue;
        }
        if b.start >= cursor + duration {
            break;
        }
        cursor = b.end;
    }
    (cursor + duration <= window_end).then_some(cursor)
}

/// Free sub-spans of `window` left over after removing the merged busy
/// spans.
pub(super) fn subtract_busy(window: &Span, busy: &[Span]) -> Vec<Span> {
    let mut free = Vec::new();
    let mut cursor = window.start;
    for b in busy {
        if b.end <= cursor {
            continue;
        }
        if b.start >= window.end {
            break;
        }
        if b.start > cursor {
            free.push(Span::new(cursor, b.start));
        }
        cursor = b.end;
        if cursor >= window.end {
            return free;
        }
    }
    if cursor < window.end {
        free.push(Span::new(cursor, window.end));
    }
    free
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BlockingRule, EntryKind, HOUR_MS};

    const H: Ms = HOUR_MS;

    fn booking(start: Ms, end: Ms, rule: BlockingRule) -> Entry {
        Entry {
            id: Ulid::new(),
            span: Span::new(start, end),
            kind: EntryKind::Booking { rule },
        }
    }

    fn job(start: Ms, end: Ms) -> Entry {
        Entry {
            id: Ulid::new(),
            span: Span::new(start, end),
            kind: EntryKind::Job,
        }
    }

    fn timeline(entries: &[Entry]) -> MachineTimeline {
        let mut tl = MachineTimeline::new(Ulid::new());
        for &e in entries {
            tl.insert(e);
        }
        tl
    }

    fn rank(entry: &Entry, score: u8) -> (Ulid, Rank) {
        (
            entry.id,
            Rank {
                score,
                due_date: None,
                id: entry.id,
            },
        )
    }

    #[test]
    fn earliest_gap_walks_busy_spans() {
        let busy = vec![Span::new(10, 20), Span::new(25, 40)];
        assert_eq!(earliest_gap(&busy, 5, 0, 100), Some(0));
        assert_eq!(earliest_gap(&busy, 5, 12, 100), Some(20));
        assert_eq!(earliest_gap(&busy, 6, 12, 100), Some(40));
        // Window too tight for the only remaining slot.
        assert_eq!(earliest_gap(&busy, 6, 12, 45), None);
    }

    #[test]
    fn merge_overlapping_joins_adjacent() {
        let spans = vec![Span::new(0, 10), Span::new(10, 20), Span::new(30, 40)];
        assert_eq!(
            merge_overlapping(&spans),
            vec![Span::new(0, 20), Span::new(30, 40)]
        );
    }

    #[test]
    fn subtract_busy_yields_free_spans() {
        let window = Span::new(0, 100);
        let busy = vec![Span::new(10, 20), Span::new(40, 60)];
        assert_eq!(
            subtract_busy(&window, &busy),
            vec![Span::new(0, 10), Span::new(20, 40), Span::new(60, 100)]
        );
        assert_eq!(subtract_busy(&window, &[]), vec![window]);
        // A busy span covering past both window edges leaves nothing.
        assert!(subtract_busy(&Span::new(10, 20), &[Span::new(0, 30)]).is_empty());
    }

    #[test]
    fn hard_conflict_aborts() {
        let maintenance = booking(10 * H, 11 * H, BlockingRule::Complete);
        let tl = timeline(&[maintenance]);
        let target = job(10 * H + H / 2, 11 * H + H / 2);
        let result = plan(&tl, target, true, 720 * H, &HashSet::new(), &HashMap::new());
        assert_eq!(result, Err(SchedulerError::Conflict { with: maintenance.id }));
    }

    #[test]
    fn soft_conflict_relocates_to_next_gap() {
        let tool_change = booking(10 * H, 11 * H, BlockingRule::Flexible);
        let tl = timeline(&[tool_change]);
        let target = job(10 * H, 11 * H);
        let ranks = HashMap::from([rank(&tool_change, 40), rank(&target, 90)]);

        let plan = plan(&tl, target, true, 720 * H, &HashSet::new(), &ranks).unwrap();
        assert_eq!(plan.moves.len(), 1);
        assert_eq!(plan.moves[0].id, tool_change.id);
        assert_eq!(plan.moves[0].to, Span::new(11 * H, 12 * H));
    }

    #[test]
    fn lowest_priority_yields_first() {
        let weak = booking(10 * H, 11 * H, BlockingRule::Flexible);
        let strong = job(11 * H, 12 * H);
        let tl = timeline(&[weak, strong]);
        let target = job(10 * H, 12 * H);
        let ranks = HashMap::from([rank(&weak, 30), rank(&strong, 80), rank(&target, 90)]);

        let plan = plan(&tl, target, true, 720 * H, &HashSet::new(), &ranks).unwrap();
        assert_eq!(plan.moves[0].id, weak.id);
        assert_eq!(plan.moves[1].id, strong.id);
        // Both land after the target, weak first since it moved first.
        assert_eq!(plan.moves[0].to, Span::new(12 * H, 13 * H));
        assert_eq!(plan.moves[1].to, Span::new(13 * H, 14 * H));
    }

    #[test]
    fn informational_overlap_is_not_displaced() {
        let inspection = booking(10 * H, 11 * H, BlockingRule::None);
        let tl = timeline(&[inspection]);
        let target = job(10 * H, 11 * H);
        let plan = plan(&tl, target, true, 720 * H, &HashSet::new(), &HashMap::new()).unwrap();
        assert!(plan.moves.is_empty());
    }

    #[test]
    fn no_gap_within_horizon_fails() {
        let tool_change = booking(10 * H, 11 * H, BlockingRule::Flexible);
        let wall = booking(11 * H, 13 * H, BlockingRule::Complete);
        let tl = timeline(&[tool_change, wall]);
        let target = job(10 * H, 11 * H);
        let ranks = HashMap::from([rank(&tool_change, 40), rank(&target, 90)]);

        // Horizon of one hour from the tool change's start: the only free
        // slot is past 13:00, out of reach.
        let result = plan(&tl, target, true, H, &HashSet::new(), &ranks);
        assert_eq!(
            result,
            Err(SchedulerError::ResolutionFailed { entry: tool_change.id })
        );
    }

    #[test]
    fn locked_candidate_fails_resolution() {
        let tool_change = booking(10 * H, 11 * H, BlockingRule::Flexible);
        let tl = timeline(&[tool_change]);
        let target = job(10 * H, 11 * H);
        let locked = HashSet::from([tool_change.id]);
        let ranks = HashMap::from([rank(&tool_change, 40)]);

        let result = plan(&tl, target, true, 720 * H, &locked, &ranks);
        assert_eq!(
            result,
            Err(SchedulerError::ResolutionFailed { entry: tool_change.id })
        );
    }

    #[test]
    fn auto_resolve_off_rejects_soft_conflicts() {
        let tool_change = booking(10 * H, 11 * H, BlockingRule::Flexible);
        let tl = timeline(&[tool_change]);
        let target = job(10 * H, 11 * H);
        let ranks = HashMap::from([rank(&tool_change, 40)]);

        let result = plan(&tl, target, false, 720 * H, &HashSet::new(), &ranks);
        assert_eq!(result, Err(SchedulerError::Conflict { with: tool_change.id }));
    }

    #[test]
    fn planning_is_idempotent() {
        let tool_change = booking(10 * H, 11 * H, BlockingRule::Flexible);
        let tl = timeline(&[tool_change]);
        let target = job(10 * H, 11 * H);
        let ranks = HashMap::from([rank(&tool_change, 40), rank(&target, 90)]);

        let first = plan(&tl, target, true, 720 * H, &HashSet::new(), &ranks).unwrap();
        let second = plan(&tl, target, true, 720 * H, &HashSet::new(), &ranks).unwrap();
        assert_eq!(first, second);
    }
}
