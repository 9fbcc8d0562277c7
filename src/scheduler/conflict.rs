use ulid::Ulid;

use crate::model::{BlockingRule, Entry, Ms, Span};

use super::SchedulerError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_span(span: &Span) -> Result<(), SchedulerError> {
    if span.start >= span.end {
        return Err(SchedulerError::Validation("interval start must be before end"));
    }
    Ok(())
}

/// Whether two overlapping entries are in conflict, and if so how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictClass {
    NoConflict,
    /// Resolvable by relocating the flexible, unlocked side.
    Soft,
    /// Unconditionally rejected; neither side gets moved.
    Hard,
}

/// Classify a pair of blocking rules. `None` never produces a conflict,
/// regardless of the other side; between the remaining rules the less
/// permissive one decides.
pub fn classify(a: BlockingRule, b: BlockingRule) -> ConflictClass {
    use BlockingRule::*;
    match (a, b) {
        (None, _) | (_, None) => ConflictClass::NoConflict,
        (Complete, _) | (_, Complete) => ConflictClass::Hard,
        (Flexible, Flexible) => ConflictClass::Soft,
    }
}

/// All conflicting pairs in a committed timeline. Entries must be sorted
/// by start. A clean timeline returns an empty list; this is the check
/// behind the non-overlap invariant.
pub fn committed_conflicts(entries: &[Entry]) -> Vec<(Ulid, Ulid)> {
    let mut out = Vec::new();
    for (i, a) in entries.iter().enumerate() {
        for b in &entries[i + 1..] {
            if b.span.start >= a.span.end {
                break;
            }
            if a.span.overlaps(&b.span) && classify(a.rule(), b.rule()) != ConflictClass::NoConflict
            {
                out.push((a.id, b.id));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntryKind;

    #[test]
    fn classify_matrix() {
        use BlockingRule::*;
        // None dominates: never a conflict.
        assert_eq!(classify(None, None), ConflictClass::NoConflict);
        assert_eq!(classify(None, Flexible), ConflictClass::NoConflict);
        assert_eq!(classify(None, Complete), ConflictClass::NoConflict);
        assert_eq!(classify(Complete, None), ConflictClass::NoConflict);
        // Complete on either remaining side is hard.
        assert_eq!(classify(Complete, Complete), ConflictClass::Hard);
        assert_eq!(classify(Complete, Flexible), ConflictClass::Hard);
        assert_eq!(classify(Flexible, Complete), ConflictClass::Hard);
        // Flexible vs flexible is resolvable.
        assert_eq!(classify(Flexible, Flexible), ConflictClass::Soft);
    }

    fn entry(start: Ms, end: Ms, rule: BlockingRule) -> Entry {
        Entry {
            id: Ulid::new(),
            span: Span::new(start, end),
            kind: EntryKind::Booking { rule },
        }
    }

    #[test]
    fn committed_conflicts_finds_overlapping_pairs() {
        let a = entry(100, 300, BlockingRule::Complete);
        let b = entry(200, 400, BlockingRule::Flexible);
        let c = entry(400, 500, BlockingRule::Flexible);
        let conflicts = committed_conflicts(&[a, b, c]);
        assert_eq!(conflicts, vec![(a.id, b.id)]);
    }

    #[test]
    fn committed_conflicts_ignores_informational_entries() {
        let a = entry(100, 300, BlockingRule::Complete);
        let b = entry(150, 250, BlockingRule::None);
        assert!(committed_conflicts(&[a, b]).is_empty());
    }

    #[test]
    fn validate_span_rejects_inverted() {
        assert!(validate_span(&Span { start: 200, end: 100 }).is_err());
        assert!(validate_span(&Span { start: 100, end: 100 }).is_err());
        assert!(validate_span(&Span { start: 100, end: 200 }).is_ok());
    }
}
