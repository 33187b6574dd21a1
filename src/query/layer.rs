//! Read-only query facade over a cached materialized state: existence,
//! property lookup, and adjacency, gated by the configured staleness policy.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::config::StalenessPolicy;
use crate::error::{Result, WarpError};
use crate::materialize::Adjacency;
use crate::model::clock::VersionVector;
use crate::model::value::PropertyValue;
use crate::state::WarpState;

use super::traversal::{self, Direction, LabelFilter};

struct CachedState {
    state: WarpState,
}

/// Answers point queries against whatever state was last installed via
/// [`QueryLayer::set_state`]. Raises [`WarpError::NoState`] if nothing has
/// been materialized yet, and [`WarpError::StaleState`] under
/// [`StalenessPolicy::Strict`] when the caller supplies a live frontier the
/// cached state doesn't dominate.
pub struct QueryLayer {
    staleness: StalenessPolicy,
    cached: RwLock<Option<CachedState>>,
}

impl QueryLayer {
    pub fn new(staleness: StalenessPolicy) -> Self {
        Self {
            staleness,
            cached: RwLock::new(None),
        }
    }

    pub fn set_state(&self, state: WarpState) {
        *self.cached.write() = Some(CachedState { state });
    }

    pub fn clear(&self) {
        *self.cached.write() = None;
    }

    pub fn has_cached_state(&self) -> bool {
        self.cached.read().is_some()
    }

    /// Clones the currently cached state, if any, bypassing the staleness
    /// check — used by the graph facade to diff against a freshly
    /// materialized state before installing it.
    pub fn peek(&self) -> Option<WarpState> {
        self.cached.read().as_ref().map(|c| c.state.clone())
    }

    fn snapshot(&self, live_frontier: Option<&VersionVector>) -> Result<WarpState> {
        let guard = self.cached.read();
        let cached = guard.as_ref().ok_or(WarpError::NoState)?;
        if self.staleness == StalenessPolicy::Strict {
            if let Some(live) = live_frontier {
                if !cached.state.observed_frontier.dominates(live) {
                    return Err(WarpError::StaleState);
                }
            }
        }
        Ok(cached.state.clone())
    }

    pub fn has_node(&self, node: &str, live_frontier: Option<&VersionVector>) -> Result<bool> {
        Ok(self.snapshot(live_frontier)?.is_node_alive(node))
    }

    pub fn has_edge(&self, from: &str, to: &str, label: &str, live_frontier: Option<&VersionVector>) -> Result<bool> {
        Ok(self.snapshot(live_frontier)?.is_edge_alive(from, to, label))
    }

    pub fn get_node_props(&self, node: &str, live_frontier: Option<&VersionVector>) -> Result<BTreeMap<String, PropertyValue>> {
        let state = self.snapshot(live_frontier)?;
        Ok(state.node_props(node).into_iter().map(|(k, reg)| (k, reg.value.clone())).collect())
    }

    pub fn get_edge_props(
        &self,
        from: &str,
        to: &str,
        label: &str,
        live_frontier: Option<&VersionVector>,
    ) -> Result<BTreeMap<String, PropertyValue>> {
        let state = self.snapshot(live_frontier)?;
        Ok(state.edge_props(from, to, label).into_iter().map(|(k, reg)| (k, reg.value.clone())).collect())
    }

    /// `(neighborId, label)` pairs reachable in one hop, using the given
    /// cached [`Adjacency`] (the caller owns adjacency caching via
    /// [`crate::materialize::MaterializationService::adjacency_for`]).
    pub fn get_edges(
        &self,
        adjacency: &Adjacency,
        node: &str,
        direction: Direction,
        label_filter: &LabelFilter,
        live_frontier: Option<&VersionVector>,
    ) -> Result<Vec<(String, String)>> {
        self.snapshot(live_frontier)?;
        Ok(traversal::neighbors_one_hop(adjacency, node, direction, label_filter))
    }

    /// Deduplicated neighbor node ids in one hop.
    pub fn neighbors(
        &self,
        adjacency: &Adjacency,
        node: &str,
        direction: Direction,
        label_filter: &LabelFilter,
        live_frontier: Option<&VersionVector>,
    ) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .get_edges(adjacency, node, direction, label_filter, live_frontier)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::clock::Dot;

    #[test]
    fn raises_no_state_before_first_set() {
        let layer = QueryLayer::new(StalenessPolicy::Lenient);
        assert!(matches!(layer.has_node("n1", None), Err(WarpError::NoState)));
    }

    #[test]
    fn lenient_policy_ignores_live_frontier() {
        let layer = QueryLayer::new(StalenessPolicy::Lenient);
        let mut state = WarpState::empty();
        state.node_alive.add("n1".to_string(), Dot::new("w1", 1));
        layer.set_state(state);

        let mut live = VersionVector::new();
        live.observe("w1", 99);
        assert!(layer.has_node("n1", Some(&live)).unwrap());
    }

    #[test]
    fn strict_policy_raises_stale_state() {
        let layer = QueryLayer::new(StalenessPolicy::Strict);
        let mut state = WarpState::empty();
        state.node_alive.add("n1".to_string(), Dot::new("w1", 1));
        state.observed_frontier.observe("w1", 1);
        layer.set_state(state);

        let mut live = VersionVector::new();
        live.observe("w1", 2);
        assert!(matches!(layer.has_node("n1", Some(&live)), Err(WarpError::StaleState)));
    }
}
