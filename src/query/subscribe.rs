//! Change subscriptions with optional glob prefilters and replay.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::WarpError;
use crate::model::keycodec;
use crate::model::value::PropertyValue;
use crate::state::WarpState;

use super::glob::GlobCache;

/// The delta between two consecutive materializations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDiff {
    pub nodes_added: BTreeSet<String>,
    pub nodes_removed: BTreeSet<String>,
    pub edges_added: BTreeSet<String>,
    pub edges_removed: BTreeSet<String>,
    pub props_set: BTreeMap<String, PropertyValue>,
    pub props_removed: BTreeSet<String>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.nodes_added.is_empty()
            && self.nodes_removed.is_empty()
            && self.edges_added.is_empty()
            && self.edges_removed.is_empty()
            && self.props_set.is_empty()
            && self.props_removed.is_empty()
    }
}

fn visible_props(state: &WarpState) -> BTreeMap<String, PropertyValue> {
    state
        .prop
        .iter()
        .filter(|(key, reg)| {
            if let Some(edge_key) = keycodec::edge_key_of_prop(key) {
                let Some((from, to, label)) = keycodec::decode_edge_key(&edge_key) else {
                    return false;
                };
                state.is_edge_alive(from, to, label) && state.edge_prop_visible(key, &reg.event_id)
            } else {
                let node = key.split('\0').next().unwrap_or_default();
                state.is_node_alive(node)
            }
        })
        .map(|(key, reg)| (key.clone(), reg.value.clone()))
        .collect()
}

/// Computes the diff of visible content between `old` and `new`.
pub fn diff_states(old: &WarpState, new: &WarpState) -> StateDiff {
    let old_nodes: BTreeSet<&String> = old.node_alive.iter_visible().collect();
    let new_nodes: BTreeSet<&String> = new.node_alive.iter_visible().collect();
    let old_edges: BTreeSet<&String> = old.edge_alive.iter_visible().collect();
    let new_edges: BTreeSet<&String> = new.edge_alive.iter_visible().collect();

    let old_props = visible_props(old);
    let new_props = visible_props(new);

    let mut props_set = BTreeMap::new();
    for (key, value) in &new_props {
        match old_props.get(key) {
            Some(old_value) if old_value == value => {}
            _ => {
                props_set.insert(key.clone(), value.clone());
            }
        }
    }
    let props_removed: BTreeSet<String> = old_props.keys().filter(|k| !new_props.contains_key(*k)).cloned().collect();

    StateDiff {
        nodes_added: new_nodes.difference(&old_nodes).map(|s| s.to_string()).collect(),
        nodes_removed: old_nodes.difference(&new_nodes).map(|s| s.to_string()).collect(),
        edges_added: new_edges.difference(&old_edges).map(|s| s.to_string()).collect(),
        edges_removed: old_edges.difference(&new_edges).map(|s| s.to_string()).collect(),
        props_set,
        props_removed,
    }
}

/// A full materialized state rendered as an "additions-only" diff, used for
/// `replay=true` delivery against an already-cached state.
pub fn full_state_as_diff(state: &WarpState) -> StateDiff {
    diff_states(&WarpState::empty(), state)
}

/// Restricts a diff to entries touching nodes/edges/props matching
/// `pattern`: nodes by id, edges by either endpoint, props by owning node.
fn prefilter(diff: &StateDiff, glob: &GlobCache, pattern: &str) -> StateDiff {
    let node_matches = |n: &str| glob.matches(pattern, n).unwrap_or(false);
    let edge_matches = |e: &str| {
        keycodec::decode_edge_key(e)
            .map(|(from, to, _)| node_matches(from) || node_matches(to))
            .unwrap_or(false)
    };
    let prop_matches = |key: &str| {
        if let Some(edge_key) = keycodec::edge_key_of_prop(key) {
            edge_matches(&edge_key)
        } else {
            node_matches(key.split('\0').next().unwrap_or_default())
        }
    };

    StateDiff {
        nodes_added: diff.nodes_added.iter().filter(|n| node_matches(n)).cloned().collect(),
        nodes_removed: diff.nodes_removed.iter().filter(|n| node_matches(n)).cloned().collect(),
        edges_added: diff.edges_added.iter().filter(|e| edge_matches(e)).cloned().collect(),
        edges_removed: diff.edges_removed.iter().filter(|e| edge_matches(e)).cloned().collect(),
        props_set: diff.props_set.iter().filter(|(k, _)| prop_matches(k)).map(|(k, v)| (k.clone(), v.clone())).collect(),
        props_removed: diff.props_removed.iter().filter(|k| prop_matches(k)).cloned().collect(),
    }
}

/// A change handler pair: invoked after every successful materialize that
/// produces a non-empty (post-prefilter) diff.
pub struct Subscription {
    pub id: u64,
    pattern: Option<String>,
    on_change: Box<dyn Fn(&StateDiff) + Send + Sync>,
    on_error: Box<dyn Fn(&WarpError) + Send + Sync>,
    pub replay: bool,
}

/// Options for registering a subscription.
pub struct SubscribeOptions {
    pub on_change: Box<dyn Fn(&StateDiff) + Send + Sync>,
    pub on_error: Box<dyn Fn(&WarpError) + Send + Sync>,
    pub replay: bool,
}

/// Holds registered subscriptions and dispatches diffs to them. Handler
/// invocation is isolated: a panic in one handler is caught and routed to
/// that handler's `on_error`; a panic in `on_error` itself is swallowed.
#[derive(Default)]
pub struct SubscriptionManager {
    next_id: Mutex<u64>,
    subscriptions: Mutex<Vec<Arc<Subscription>>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, opts: SubscribeOptions) -> u64 {
        self.register(None, opts)
    }

    pub fn watch(&self, pattern: impl Into<String>, opts: SubscribeOptions) -> u64 {
        self.register(Some(pattern.into()), opts)
    }

    fn register(&self, pattern: Option<String>, opts: SubscribeOptions) -> u64 {
        let mut next_id = self.next_id.lock();
        let id = *next_id;
        *next_id += 1;
        self.subscriptions.lock().push(Arc::new(Subscription {
            id,
            pattern,
            on_change: opts.on_change,
            on_error: opts.on_error,
            replay: opts.replay,
        }));
        id
    }

    /// Idempotent: unsubscribing an unknown or already-removed id is a no-op.
    pub fn unsubscribe(&self, id: u64) {
        self.subscriptions.lock().retain(|s| s.id != id);
    }

    /// Dispatches `diff` to every subscription, applying each
    /// subscription's prefilter (if `watch`) and skipping empty results.
    pub fn dispatch(&self, glob: &GlobCache, diff: &StateDiff) {
        let subs = self.subscriptions.lock().clone();
        for sub in subs {
            let scoped = match &sub.pattern {
                Some(pattern) => prefilter(diff, glob, pattern),
                None => diff.clone(),
            };
            if scoped.is_empty() {
                continue;
            }
            Self::invoke(&sub, &scoped);
        }
    }

    /// Delivers `state` to `id` as a full additions-only diff, for
    /// `replay=true` subscriptions registered against already-cached state.
    pub fn replay_to(&self, glob: &GlobCache, id: u64, state: &WarpState) {
        let subs = self.subscriptions.lock().clone();
        if let Some(sub) = subs.into_iter().find(|s| s.id == id) {
            let diff = full_state_as_diff(state);
            let scoped = match &sub.pattern {
                Some(pattern) => prefilter(&diff, glob, pattern),
                None => diff,
            };
            if !scoped.is_empty() {
                Self::invoke(&sub, &scoped);
            }
        }
    }

    fn invoke(sub: &Subscription, diff: &StateDiff) {
        let result = catch_unwind(AssertUnwindSafe(|| (sub.on_change)(diff)));
        if result.is_err() {
            let err = WarpError::ObjectStore("subscription handler panicked".to_string());
            let _ = catch_unwind(AssertUnwindSafe(|| (sub.on_error)(&err)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::clock::Dot;

    #[test]
    fn diff_detects_node_addition() {
        let old = WarpState::empty();
        let mut new = WarpState::empty();
        new.node_alive.add("n1".to_string(), Dot::new("w1", 1));
        let diff = diff_states(&old, &new);
        assert!(diff.nodes_added.contains("n1"));
        assert!(diff.nodes_removed.is_empty());
    }

    #[test]
    fn empty_diff_is_empty() {
        let state = WarpState::empty();
        assert!(diff_states(&state, &state).is_empty());
    }

    #[test]
    fn dispatch_skips_empty_diff_after_prefilter() {
        let manager = SubscriptionManager::new();
        let glob = GlobCache::new();
        let delivered = Arc::new(Mutex::new(false));
        let flag = delivered.clone();
        manager.watch(
            "other:*",
            SubscribeOptions {
                on_change: Box::new(move |_diff| *flag.lock() = true),
                on_error: Box::new(|_| {}),
                replay: false,
            },
        );
        let mut diff = StateDiff::default();
        diff.nodes_added.insert("user:alice".to_string());
        manager.dispatch(&glob, &diff);
        assert!(!*delivered.lock());
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let manager = SubscriptionManager::new();
        let id = manager.subscribe(SubscribeOptions {
            on_change: Box::new(|_| {}),
            on_error: Box::new(|_| {}),
            replay: false,
        });
        manager.unsubscribe(id);
        manager.unsubscribe(id);
    }
}
