//! The join reducer: folds an ordered stream of decoded patches into a
//! [`WarpState`].

use crate::abort::AbortSignal;
use crate::error::{Result, WarpError};
use crate::model::clock::{Dot, EventId};
use crate::model::keycodec;
use crate::model::lww::LWWRegister;
use crate::patch::{DecodedPatch, Op, PropScope};
use crate::state::WarpState;

/// Result of applying one op, for the optional receipt stream.
#[derive(Debug, Clone, PartialEq)]
pub enum OpResult {
    Applied,
    Superseded { winner: EventId },
    Redundant,
}

/// One receipt entry: the outcome of applying a single op.
#[derive(Debug, Clone, PartialEq)]
pub struct OpReceipt {
    pub target: String,
    pub result: OpResult,
}

/// One receipt per input patch, emitted only when receipts are enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchReceipt {
    pub writer: String,
    pub lamport: u64,
    pub sha: String,
    pub ops: Vec<OpReceipt>,
}

/// Sorts patches for reduction: same-writer patches keep their given
/// (chain) order; across writers, order is made deterministic by sorting
/// on `(lamport, writer, sha)` ascending, as the op-application result
/// does not depend on cross-writer order.
pub fn order_patches(mut patches: Vec<DecodedPatch>) -> Vec<DecodedPatch> {
    patches.sort_by(|a, b| {
        (a.patch.lamport, &a.patch.writer, &a.sha).cmp(&(b.patch.lamport, &b.patch.writer, &b.sha))
    });
    patches
}

/// Folds an ordered list of decoded patches into a [`WarpState`], optionally
/// starting from `initial` (e.g. a checkpoint's materialized state).
///
/// The result must be invariant under any permutation of the input that
/// preserves same-writer chain order (§8); this holds because every op's
/// effect on the target CRDT container only depends on the op's own dots
/// and EventId, never on what else has been applied so far except through
/// commutative/associative/idempotent joins.
pub fn reduce(
    initial: WarpState,
    patches: &[DecodedPatch],
    receipts_enabled: bool,
    abort: Option<&AbortSignal>,
) -> Result<(WarpState, Option<Vec<PatchReceipt>>)> {
    let mut state = initial;
    let mut receipts = receipts_enabled.then(Vec::new);

    for decoded in patches {
        if let Some(signal) = abort {
            signal.check()?;
        }

        if decoded.patch.ops.is_empty() {
            return Err(WarpError::MalformedPatch {
                sha: decoded.sha.clone(),
                reason: "patch has no ops".to_string(),
            });
        }

        let mut op_receipts = Vec::new();
        for (op_index, op) in decoded.patch.ops.iter().enumerate() {
            let receipt = apply_op(&mut state, decoded, op_index as u32, op)?;
            if receipts.is_some() {
                op_receipts.push(receipt);
            }
        }

        state.max_lamport = state.max_lamport.max(decoded.patch.lamport);

        if let Some(receipts) = receipts.as_mut() {
            receipts.push(PatchReceipt {
                writer: decoded.patch.writer.clone(),
                lamport: decoded.patch.lamport,
                sha: decoded.sha.clone(),
                ops: op_receipts,
            });
        }
    }

    Ok((state, receipts))
}

fn apply_op(state: &mut WarpState, decoded: &DecodedPatch, op_index: u32, op: &Op) -> Result<OpReceipt> {
    match op {
        Op::NodeAdd { node, dot } => {
            state.node_alive.add(node.clone(), dot.clone());
            state.observed_frontier.observe_dot(dot);
            Ok(OpReceipt {
                target: node.clone(),
                result: OpResult::Applied,
            })
        }
        Op::NodeRemove { node, observed_dots } => {
            state.node_alive.remove(observed_dots.iter().cloned());
            Ok(OpReceipt {
                target: node.clone(),
                result: OpResult::Applied,
            })
        }
        Op::EdgeAdd { from, to, label, dot } => {
            let edge_key = keycodec::encode_edge_key(from, to, label);
            state.edge_alive.add(edge_key.clone(), dot.clone());
            state.observed_frontier.observe_dot(dot);
            let event_id = EventId::new(decoded.patch.lamport, &decoded.patch.writer, &decoded.sha, op_index);
            state.record_edge_birth(edge_key.clone(), event_id);
            Ok(OpReceipt {
                target: edge_key,
                result: OpResult::Applied,
            })
        }
        Op::EdgeRemove { from, to, label, observed_dots } => {
            let edge_key = keycodec::encode_edge_key(from, to, label);
            state.edge_alive.remove(observed_dots.iter().cloned());
            Ok(OpReceipt {
                target: edge_key,
                result: OpResult::Applied,
            })
        }
        Op::PropSet { scope, key, value } => {
            let full_key = match scope {
                PropScope::Node { node } => keycodec::encode_node_prop_key(node, key),
                PropScope::Edge { from, to, label } => keycodec::encode_edge_prop_key(from, to, label, key),
            };
            let event_id = EventId::new(decoded.patch.lamport, &decoded.patch.writer, &decoded.sha, op_index);
            let candidate = LWWRegister::new(event_id.clone(), value.clone());

            let result = match state.prop.get(&full_key) {
                None => OpResult::Applied,
                Some(existing) if event_id > existing.event_id => OpResult::Applied,
                Some(existing) if event_id == existing.event_id => OpResult::Redundant,
                Some(existing) => OpResult::Superseded {
                    winner: existing.event_id.clone(),
                },
            };
            state.set_prop(full_key.clone(), candidate);
            Ok(OpReceipt {
                target: full_key,
                result,
            })
        }
    }
}

/// A dot emitted as part of constructing a new op; exported for the patch
/// builder's convenience since it mirrors the reducer's own [`Dot`] type.
pub type NewDot = Dot;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::clock::VersionVector;
    use crate::model::value::PropertyValue;
    use crate::patch::{Patch, SCHEMA_VERSION};

    fn patch(writer: &str, lamport: u64, sha: &str, ops: Vec<Op>) -> DecodedPatch {
        DecodedPatch {
            sha: sha.to_string(),
            patch: Patch {
                schema: SCHEMA_VERSION,
                writer: writer.to_string(),
                lamport,
                context: VersionVector::new(),
                ops,
            },
        }
    }

    #[test]
    fn single_writer_linear_scenario() {
        let p1 = patch(
            "a",
            1,
            "c1",
            vec![Op::NodeAdd {
                node: "x".to_string(),
                dot: Dot::new("a", 1),
            }],
        );
        let p2 = patch(
            "a",
            2,
            "c2",
            vec![Op::PropSet {
                scope: PropScope::Node { node: "x".to_string() },
                key: "k".to_string(),
                value: PropertyValue::String("v".to_string()),
            }],
        );
        let (state, _) = reduce(WarpState::empty(), &[p1, p2], false, None).unwrap();
        assert!(state.is_node_alive("x"));
        assert_eq!(
            state.get_node_prop("x", "k").unwrap().value,
            PropertyValue::String("v".to_string())
        );
    }

    #[test]
    fn two_writer_merge_prefers_higher_lamport() {
        let a = patch(
            "A",
            5,
            "ca",
            vec![
                Op::NodeAdd {
                    node: "n".to_string(),
                    dot: Dot::new("A", 1),
                },
                Op::PropSet {
                    scope: PropScope::Node { node: "n".to_string() },
                    key: "who".to_string(),
                    value: PropertyValue::String("A".to_string()),
                },
            ],
        );
        let b = patch(
            "B",
            2,
            "cb",
            vec![
                Op::NodeAdd {
                    node: "n".to_string(),
                    dot: Dot::new("B", 1),
                },
                Op::PropSet {
                    scope: PropScope::Node { node: "n".to_string() },
                    key: "who".to_string(),
                    value: PropertyValue::String("B".to_string()),
                },
            ],
        );
        let ordered = order_patches(vec![b, a]);
        let (state, _) = reduce(WarpState::empty(), &ordered, false, None).unwrap();
        assert!(state.is_node_alive("n"));
        assert_eq!(
            state.get_node_prop("n", "who").unwrap().value,
            PropertyValue::String("A".to_string())
        );
    }

    #[test]
    fn remove_readd_clean_slate() {
        let add1 = patch(
            "a",
            1,
            "c1",
            vec![
                Op::EdgeAdd {
                    from: "a".to_string(),
                    to: "b".to_string(),
                    label: "rel".to_string(),
                    dot: Dot::new("a", 1),
                },
                Op::PropSet {
                    scope: PropScope::Edge {
                        from: "a".to_string(),
                        to: "b".to_string(),
                        label: "rel".to_string(),
                    },
                    key: "weight".to_string(),
                    value: PropertyValue::Int(42),
                },
            ],
        );
        let (mut state, _) = reduce(WarpState::empty(), &[add1], false, None).unwrap();
        let edge_key = keycodec::encode_edge_key("a", "b", "rel");
        let observed = state.edge_alive.observed_dots(&edge_key);

        let remove = patch(
            "a",
            2,
            "c2",
            vec![Op::EdgeRemove {
                from: "a".to_string(),
                to: "b".to_string(),
                label: "rel".to_string(),
                observed_dots: observed,
            }],
        );
        let readd = patch(
            "a",
            3,
            "c3",
            vec![Op::EdgeAdd {
                from: "a".to_string(),
                to: "b".to_string(),
                label: "rel".to_string(),
                dot: Dot::new("a", 2),
            }],
        );
        let (state2, _) = reduce(std::mem::take(&mut state), &[remove, readd], false, None).unwrap();
        assert!(state2.is_edge_alive("a", "b", "rel"));
        assert!(state2.edge_props("a", "b", "rel").is_empty());
    }

    #[test]
    fn permutation_invariance_across_writers() {
        let a = patch(
            "A",
            1,
            "ca",
            vec![Op::NodeAdd {
                node: "n1".to_string(),
                dot: Dot::new("A", 1),
            }],
        );
        let b = patch(
            "B",
            1,
            "cb",
            vec![Op::NodeAdd {
                node: "n2".to_string(),
                dot: Dot::new("B", 1),
            }],
        );
        let forward = order_patches(vec![a.clone(), b.clone()]);
        let backward = order_patches(vec![b, a]);
        let (s1, _) = reduce(WarpState::empty(), &forward, false, None).unwrap();
        let (s2, _) = reduce(WarpState::empty(), &backward, false, None).unwrap();
        assert_eq!(crate::statehash::state_hash(&s1), crate::statehash::state_hash(&s2));
    }

    #[test]
    fn empty_patch_is_rejected() {
        let p = patch("a", 1, "c1", vec![]);
        assert!(reduce(WarpState::empty(), &[p], false, None).is_err());
    }
}
