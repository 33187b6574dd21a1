//! Observed-Remove Set: the CRDT container backing `nodeAlive` and
//! `edgeAlive`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::clock::Dot;

/// An Observed-Remove Set over elements `T`. An element is visible iff it
/// has at least one dot that has never been tombstoned. Once a dot is
/// tombstoned it never revives, even if a later join re-observes it as an
/// entry (the tombstone set is itself join-commutative and only grows).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ORSet<T: Ord + Clone> {
    entries: BTreeMap<T, BTreeSet<Dot>>,
    tombstones: BTreeSet<Dot>,
}

impl<T: Ord + Clone> Default for ORSet<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            tombstones: BTreeSet::new(),
        }
    }
}

impl<T: Ord + Clone> ORSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `dot` to `elem`'s entry set. If `dot` was already tombstoned
    /// (a stale replay), the entry is still recorded but immediately
    /// filtered out of visibility by the tombstone invariant.
    pub fn add(&mut self, elem: T, dot: Dot) {
        self.entries.entry(elem).or_default().insert(dot);
    }

    /// Tombstones exactly the given observed dots; does not require that
    /// `elem` still be present.
    pub fn remove(&mut self, observed_dots: impl IntoIterator<Item = Dot>) {
        for dot in observed_dots {
            self.tombstones.insert(dot);
        }
    }

    /// True iff `elem` has at least one non-tombstoned dot.
    pub fn contains(&self, elem: &T) -> bool {
        self.entries
            .get(elem)
            .is_some_and(|dots| dots.iter().any(|d| !self.tombstones.contains(d)))
    }

    /// The dots currently observed for `elem`, tombstoned or not. Used by
    /// the patch builder to snapshot `observedDots` for a remove op.
    pub fn observed_dots(&self, elem: &T) -> Vec<Dot> {
        self.entries
            .get(elem)
            .map(|dots| dots.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Visible elements in sorted order.
    pub fn iter_visible(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().filter_map(move |(elem, dots)| {
            dots.iter().any(|d| !self.tombstones.contains(d)).then_some(elem)
        })
    }

    pub fn len_visible(&self) -> usize {
        self.iter_visible().count()
    }

    /// Union entries, union tombstones, then purge tombstoned dots from
    /// entries so the representation doesn't grow forever with dead dots.
    pub fn join(&self, other: &Self) -> Self {
        let mut entries = self.entries.clone();
        for (elem, dots) in &other.entries {
            entries.entry(elem.clone()).or_default().extend(dots.iter().cloned());
        }
        let mut tombstones = self.tombstones.clone();
        tombstones.extend(other.tombstones.iter().cloned());

        for dots in entries.values_mut() {
            dots.retain(|d| !tombstones.contains(d));
        }
        entries.retain(|_, dots| !dots.is_empty());

        Self { entries, tombstones }
    }

    /// All (sorted) entries with their full dot sets, including elements
    /// whose dots are entirely tombstoned — used by the state hash, which
    /// hashes tombstones too.
    pub fn raw_entries(&self) -> &BTreeMap<T, BTreeSet<Dot>> {
        &self.entries
    }

    pub fn tombstones(&self) -> &BTreeSet<Dot> {
        &self.tombstones
    }
}
