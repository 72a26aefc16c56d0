//! In-memory index of operations that were added but not yet committed.
//!
//! The set itself is unsynchronized; it lives inside the pending log's
//! mutex-guarded state and is only touched while that lock is held.

use crate::entry::Entry;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct PendingSet {
    entries: HashMap<i64, Entry>,
    /// Ids whose latest add may not have reached the file.
    unconfirmed: HashSet<i64>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an add, replacing any earlier add for the same id.
    pub fn record_add(&mut self, entry: Entry) {
        self.unconfirmed.remove(&entry.id);
        self.entries.insert(entry.id, entry);
    }

    /// Removes `id` if present. Commits for unknown ids are accepted.
    pub fn record_commit(&mut self, id: i64) -> Option<Entry> {
        self.unconfirmed.remove(&id);
        self.entries.remove(&id)
    }

    /// Flags `id` as pending but with unknown durability.
    pub fn mark_unconfirmed(&mut self, id: i64) {
        if self.entries.contains_key(&id) {
            self.unconfirmed.insert(id);
        }
    }

    pub fn get(&self, id: i64) -> Option<&Entry> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copies out all pending entries ordered by id.
    pub fn snapshot(&self) -> Vec<(i64, Entry)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        out.sort_unstable_by_key(|(id, _)| *id);
        out
    }

    /// Ids marked unconfirmed, ordered.
    pub fn unconfirmed(&self) -> Vec<i64> {
        let mut ids: Vec<_> = self.unconfirmed.iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}
