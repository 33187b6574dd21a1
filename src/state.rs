//! [`WarpState`]: the fully materialized logical graph.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::clock::{EventId, VersionVector};
use crate::model::keycodec;
use crate::model::lww::LWWRegister;
use crate::model::orset::ORSet;

/// The fully materialized logical graph: alive sets, property registers,
/// edge birth events (for staleness filtering), and the observed frontier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarpState {
    pub node_alive: ORSet<String>,
    pub edge_alive: ORSet<String>,
    pub prop: BTreeMap<String, LWWRegister>,
    /// Edge key -> greatest EventId that ever added that edge key. Used to
    /// hide ghost properties from a tombstoned-then-readded edge
    /// incarnation (see [`Self::edge_prop_visible`]).
    pub edge_birth_event: BTreeMap<String, EventId>,
    pub observed_frontier: VersionVector,
    /// Greatest patch lamport integrated from any writer so far. Tracked
    /// separately from `observed_frontier`, which only ever advances via
    /// `observe_dot` on NodeAdd/EdgeAdd (§4.1); this field is the ceiling
    /// used to assign the next patch's lamport (§4.2).
    pub max_lamport: u64,
}

impl Default for WarpState {
    fn default() -> Self {
        Self::empty()
    }
}

impl WarpState {
    pub fn empty() -> Self {
        Self {
            node_alive: ORSet::new(),
            edge_alive: ORSet::new(),
            prop: BTreeMap::new(),
            edge_birth_event: BTreeMap::new(),
            observed_frontier: VersionVector::new(),
            max_lamport: 0,
        }
    }

    pub fn is_node_alive(&self, node: &str) -> bool {
        self.node_alive.contains(&node.to_string())
    }

    pub fn is_edge_alive(&self, from: &str, to: &str, label: &str) -> bool {
        self.edge_alive.contains(&keycodec::encode_edge_key(from, to, label))
    }

    /// True iff the edge-property register at `key` is not a ghost from a
    /// previous, now-tombstoned incarnation of the owning edge.
    pub fn edge_prop_visible(&self, key: &str, event_id: &EventId) -> bool {
        let Some(edge_key) = keycodec::edge_key_of_prop(key) else {
            return true;
        };
        match self.edge_birth_event.get(&edge_key) {
            Some(birth) => event_id >= birth,
            None => true,
        }
    }

    /// Records the admission of a property register, applying the
    /// edge-birth staleness rule (§4.1's "mandatory" rule) implicitly via
    /// [`Self::edge_prop_visible`] at read time — the register itself is
    /// always stored so a later join can still resolve it.
    pub fn set_prop(&mut self, key: String, candidate: LWWRegister) {
        self.prop
            .entry(key)
            .and_modify(|existing| existing.apply(candidate.clone()))
            .or_insert(candidate);
    }

    pub fn get_node_prop(&self, node: &str, prop_key: &str) -> Option<&LWWRegister> {
        self.prop.get(&keycodec::encode_node_prop_key(node, prop_key))
    }

    pub fn get_edge_prop(&self, from: &str, to: &str, label: &str, prop_key: &str) -> Option<&LWWRegister> {
        let key = keycodec::encode_edge_prop_key(from, to, label, prop_key);
        let reg = self.prop.get(&key)?;
        self.edge_prop_visible(&key, &reg.event_id).then_some(reg)
    }

    /// All `(propKey, register)` pairs visible for a node, sorted.
    pub fn node_props(&self, node: &str) -> BTreeMap<String, &LWWRegister> {
        let prefix = format!("{node}\0");
        self.prop
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| !keycodec::is_edge_prop_key(k))
            .map(|(k, v)| (k[prefix.len()..].to_string(), v))
            .collect()
    }

    /// All visible `(propKey, register)` pairs for an edge, applying the
    /// staleness filter.
    pub fn edge_props(&self, from: &str, to: &str, label: &str) -> BTreeMap<String, &LWWRegister> {
        let prefix = keycodec::encode_edge_prop_key(from, to, label, "");
        self.prop
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, reg)| self.edge_prop_visible(k, &reg.event_id))
            .map(|(k, v)| (k[prefix.len()..].to_string(), v))
            .collect()
    }

    pub fn record_edge_birth(&mut self, edge_key: String, event_id: EventId) {
        self.edge_birth_event
            .entry(edge_key)
            .and_modify(|existing| {
                if event_id > *existing {
                    *existing = event_id.clone();
                }
            })
            .or_insert(event_id);
    }

    /// Commutative, associative, idempotent join of two states. `empty()`
    /// is the identity element.
    pub fn join(&self, other: &Self) -> Self {
        let node_alive = self.node_alive.join(&other.node_alive);
        let edge_alive = self.edge_alive.join(&other.edge_alive);

        let mut prop = self.prop.clone();
        for (key, reg) in &other.prop {
            prop.entry(key.clone())
                .and_modify(|existing| existing.apply(reg.clone()))
                .or_insert_with(|| reg.clone());
        }

        let mut edge_birth_event = self.edge_birth_event.clone();
        for (key, event_id) in &other.edge_birth_event {
            edge_birth_event
                .entry(key.clone())
                .and_modify(|existing| {
                    if event_id > existing {
                        *existing = event_id.clone();
                    }
                })
                .or_insert_with(|| event_id.clone());
        }

        let observed_frontier = self.observed_frontier.merge(&other.observed_frontier);
        let max_lamport = self.max_lamport.max(other.max_lamport);

        Self {
            node_alive,
            edge_alive,
            prop,
            edge_birth_event,
            observed_frontier,
            max_lamport,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::clock::Dot;
    use crate::model::value::PropertyValue;

    fn sample() -> WarpState {
        let mut s = WarpState::empty();
        s.node_alive.add("n1".to_string(), Dot::new("w1", 1));
        s.observed_frontier.observe("w1", 1);
        s
    }

    #[test]
    fn join_with_empty_is_identity() {
        let a = sample();
        assert_eq!(a.join(&WarpState::empty()), a);
    }

    #[test]
    fn join_is_commutative() {
        let a = sample();
        let mut b = WarpState::empty();
        b.node_alive.add("n2".to_string(), Dot::new("w2", 1));
        b.observed_frontier.observe("w2", 1);
        assert_eq!(a.join(&b), b.join(&a));
    }

    #[test]
    fn edge_prop_hidden_after_remove_and_readd() {
        let mut s = WarpState::empty();
        let edge_key = keycodec::encode_edge_key("a", "b", "rel");
        let prop_key = keycodec::encode_edge_prop_key("a", "b", "rel", "weight");

        // birth at lamport 1, prop set at lamport 1
        s.record_edge_birth(edge_key.clone(), EventId::new(1, "w1", "sha1", 0));
        s.set_prop(
            prop_key.clone(),
            LWWRegister::new(EventId::new(1, "w1", "sha1", 1), PropertyValue::Int(42)),
        );
        assert!(s.edge_props("a", "b", "rel").contains_key("weight"));

        // re-add at lamport 3 advances the birth event past the old prop
        s.record_edge_birth(edge_key, EventId::new(3, "w1", "sha2", 0));
        assert!(s.edge_props("a", "b", "rel").is_empty());
    }
}
