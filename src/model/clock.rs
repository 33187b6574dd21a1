//! Primitive identifiers and clocks: [`EventId`], [`Dot`], [`VersionVector`].

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Uniquely identifies a single op within the system. Total order is
/// lexicographic on `(lamport, writer_id, patch_sha, op_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventId {
    pub lamport: u64,
    pub writer_id: String,
    pub patch_sha: String,
    pub op_index: u32,
}

impl EventId {
    pub fn new(lamport: u64, writer_id: impl Into<String>, patch_sha: impl Into<String>, op_index: u32) -> Self {
        Self {
            lamport,
            writer_id: writer_id.into(),
            patch_sha: patch_sha.into(),
            op_index,
        }
    }
}

impl PartialOrd for EventId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lamport
            .cmp(&other.lamport)
            .then_with(|| self.writer_id.cmp(&other.writer_id))
            .then_with(|| self.patch_sha.cmp(&other.patch_sha))
            .then_with(|| self.op_index.cmp(&other.op_index))
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}#{}:{}",
            self.lamport, self.writer_id, self.patch_sha, self.op_index
        )
    }
}

/// A single CRDT add event, emitted by a writer to tag element membership.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dot {
    pub writer_id: String,
    pub counter: u64,
}

impl Dot {
    pub fn new(writer_id: impl Into<String>, counter: u64) -> Self {
        Self {
            writer_id: writer_id.into(),
            counter,
        }
    }
}

impl fmt::Display for Dot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.writer_id, self.counter)
    }
}

/// Maps each writer to the highest counter observed from it. Merge takes the
/// per-writer maximum; two vectors are comparable iff one dominates the
/// other pointwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector {
    counters: BTreeMap<String, u64>,
}

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, writer_id: &str) -> u64 {
        self.counters.get(writer_id).copied().unwrap_or(0)
    }

    pub fn observe(&mut self, writer_id: &str, counter: u64) {
        let entry = self.counters.entry(writer_id.to_string()).or_insert(0);
        if counter > *entry {
            *entry = counter;
        }
    }

    pub fn observe_dot(&mut self, dot: &Dot) {
        self.observe(&dot.writer_id, dot.counter);
    }

    pub fn contains(&self, dot: &Dot) -> bool {
        self.get(&dot.writer_id) >= dot.counter
    }

    /// Per-writer maximum of two vectors.
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for (writer, counter) in &other.counters {
            merged.observe(writer, *counter);
        }
        merged
    }

    pub fn merge_in_place(&mut self, other: &Self) {
        for (writer, counter) in &other.counters {
            self.observe(writer, *counter);
        }
    }

    /// `self` dominates `other` iff every writer's counter in `other` is
    /// `<=` the corresponding counter in `self`.
    pub fn dominates(&self, other: &Self) -> bool {
        other.counters.iter().all(|(writer, counter)| self.get(writer) >= *counter)
    }

    /// Two vectors are comparable iff one dominates the other.
    pub fn comparable(&self, other: &Self) -> bool {
        self.dominates(other) || other.dominates(self)
    }

    pub fn is_empty(&self) -> bool {
        self.counters.values().all(|c| *c == 0)
    }

    /// Sorted `(writer_id, counter)` pairs, for canonical hashing and
    /// deterministic serialization.
    pub fn sorted_entries(&self) -> Vec<(&str, u64)> {
        self.counters.iter().map(|(w, c)| (w.as_str(), *c)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counters.iter().map(|(w, c)| (w.as_str(), *c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_orders_by_lamport_first() {
        let a = EventId::new(1, "z", "sha", 0);
        let b = EventId::new(2, "a", "sha", 0);
        assert!(a < b);
    }

    #[test]
    fn version_vector_merge_is_per_writer_max() {
        let mut a = VersionVector::new();
        a.observe("w1", 5);
        let mut b = VersionVector::new();
        b.observe("w1", 3);
        b.observe("w2", 9);
        let merged = a.merge(&b);
        assert_eq!(merged.get("w1"), 5);
        assert_eq!(merged.get("w2"), 9);
    }

    #[test]
    fn dominates_is_pointwise() {
        let mut a = VersionVector::new();
        a.observe("w1", 5);
        a.observe("w2", 2);
        let mut b = VersionVector::new();
        b.observe("w1", 3);
        assert!(a.dominates(&b));
        assert!(!b.dominates(&a));
    }

    #[test]
    fn incomparable_vectors_are_not_comparable() {
        let mut a = VersionVector::new();
        a.observe("w1", 5);
        let mut b = VersionVector::new();
        b.observe("w2", 5);
        assert!(!a.comparable(&b));
    }
}
