//! Read-only, glob-filtered projections of a materialized state.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::model::value::PropertyValue;
use crate::state::WarpState;

use super::glob::GlobCache;

/// A node-pattern projection with an optional allow-list (`expose`) or
/// deny-list (`redact`) of property keys. If both are set, `expose` wins.
#[derive(Debug, Clone)]
pub struct ObserverView {
    pub pattern: String,
    pub expose: Option<Vec<String>>,
    pub redact: Option<Vec<String>>,
}

impl ObserverView {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            expose: None,
            redact: None,
        }
    }

    pub fn with_expose(mut self, keys: Vec<String>) -> Self {
        self.expose = Some(keys);
        self
    }

    pub fn with_redact(mut self, keys: Vec<String>) -> Self {
        self.redact = Some(keys);
        self
    }

    fn filter_props(&self, props: BTreeMap<String, PropertyValue>) -> BTreeMap<String, PropertyValue> {
        if let Some(expose) = &self.expose {
            props.into_iter().filter(|(k, _)| expose.contains(k)).collect()
        } else if let Some(redact) = &self.redact {
            props.into_iter().filter(|(k, _)| !redact.contains(k)).collect()
        } else {
            props
        }
    }

    /// Projects `state` through this view: every visible node whose id
    /// matches `pattern`, with its visible properties filtered.
    pub fn project(&self, glob: &GlobCache, state: &WarpState) -> Result<BTreeMap<String, BTreeMap<String, PropertyValue>>> {
        let regex = glob.compile(&self.pattern)?;
        let mut out = BTreeMap::new();
        for node in state.node_alive.iter_visible() {
            if !regex.is_match(node) {
                continue;
            }
            let props: BTreeMap<String, PropertyValue> = state
                .node_props(node)
                .into_iter()
                .map(|(k, reg)| (k, reg.value.clone()))
                .collect();
            out.insert(node.clone(), self.filter_props(props));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::clock::{Dot, EventId};
    use crate::model::lww::LWWRegister;
    use crate::model::value::PropertyValue;

    fn sample_state() -> WarpState {
        let mut state = WarpState::empty();
        state.node_alive.add("user:alice".to_string(), Dot::new("w1", 1));
        state.node_alive.add("group:admins".to_string(), Dot::new("w1", 2));
        state.set_prop(
            crate::model::keycodec::encode_node_prop_key("user:alice", "email"),
            LWWRegister::new(EventId::new(1, "w1", "sha", 0), PropertyValue::String("a@x.com".to_string())),
        );
        state.set_prop(
            crate::model::keycodec::encode_node_prop_key("user:alice", "ssn"),
            LWWRegister::new(EventId::new(1, "w1", "sha", 1), PropertyValue::String("secret".to_string())),
        );
        state
    }

    #[test]
    fn pattern_restricts_nodes() {
        let state = sample_state();
        let glob = GlobCache::new();
        let view = ObserverView::new("user:*");
        let projected = view.project(&glob, &state).unwrap();
        assert!(projected.contains_key("user:alice"));
        assert!(!projected.contains_key("group:admins"));
    }

    #[test]
    fn redact_hides_listed_keys() {
        let state = sample_state();
        let glob = GlobCache::new();
        let view = ObserverView::new("*").with_redact(vec!["ssn".to_string()]);
        let projected = view.project(&glob, &state).unwrap();
        assert!(projected["user:alice"].contains_key("email"));
        assert!(!projected["user:alice"].contains_key("ssn"));
    }

    #[test]
    fn expose_takes_precedence_over_redact() {
        let state = sample_state();
        let glob = GlobCache::new();
        let view = ObserverView::new("*")
            .with_expose(vec!["ssn".to_string()])
            .with_redact(vec!["ssn".to_string()]);
        let projected = view.project(&glob, &state).unwrap();
        assert!(projected["user:alice"].contains_key("ssn"));
        assert!(!projected["user:alice"].contains_key("email"));
    }
}
