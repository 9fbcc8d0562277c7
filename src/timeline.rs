use ulid::Ulid;

use crate::model::{Entry, Span};

/// Authoritative, order-preserving set of committed allocations for one
/// machine. Entries stay sorted by `span.start` so overlap queries can
/// bound their candidate range with a binary search.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineTimeline {
    pub machine_id: Ulid,
    entries: Vec<Entry>,
}

impl MachineTimeline {
    pub fn new(machine_id: Ulid) -> Self {
        Self {
            machine_id,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: Ulid) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Insert an entry maintaining sort order by `span.start`.
    pub fn insert(&mut self, entry: Entry) {
        let pos = self
            .entries
            .binary_search_by_key(&entry.span.start, |e| e.span.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, entry);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Entry> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// Move an entry to a new interval, keeping sort order. Returns the old
    /// interval, or `None` if the entry is unknown.
    pub fn reschedule(&mut self, id: Ulid, span: Span) -> Option<Span> {
        let old = self.remove(id)?;
        self.insert(Entry { span, ..old });
        Some(old.span)
    }

    /// Entries whose span overlaps the query window, in start order.
    /// Everything at index >= right_bound starts at or after `query.end`
    /// and cannot overlap.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Entry> {
        let right_bound = self.entries.partition_point(|e| e.span.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.span.end > query.start)
    }
}
