//! Property-based tests for the join-reducer's lattice laws and
//! permutation invariance, generating random small patch sets over a
//! handful of writers and node ids.

use proptest::prelude::*;

use warpgraph::model::clock::{Dot, VersionVector};
use warpgraph::model::value::PropertyValue;
use warpgraph::reduce::{order_patches, reduce};
use warpgraph::statehash::state_hash;
use warpgraph::WarpState;
use warpgraph::patch::{DecodedPatch, Op, Patch, PropScope, SCHEMA_VERSION};

const WRITERS: [&str; 3] = ["w1", "w2", "w3"];
const NODES: [&str; 4] = ["n0", "n1", "n2", "n3"];

fn arb_op() -> impl Strategy<Value = (usize, Op)> {
    (0..WRITERS.len(), 0..NODES.len(), 1u64..50, any::<bool>()).prop_map(|(writer_ix, node_ix, counter, as_prop)| {
        let writer = WRITERS[writer_ix];
        let node = NODES[node_ix];
        if as_prop {
            (
                writer_ix,
                Op::PropSet {
                    scope: PropScope::Node { node: node.to_string() },
                    key: "k".to_string(),
                    value: PropertyValue::Int(counter as i64),
                },
            )
        } else {
            (writer_ix, Op::NodeAdd { node: node.to_string(), dot: Dot::new(writer, counter) })
        }
    })
}

/// Builds one single-op patch per generated op, each on its own writer
/// chain position (lamport == position within that writer's own sequence).
fn arb_patch_stream() -> impl Strategy<Value = Vec<DecodedPatch>> {
    proptest::collection::vec(arb_op(), 1..12).prop_map(|ops| {
        let mut per_writer_lamport = [0u64; WRITERS.len()];
        ops.into_iter()
            .enumerate()
            .map(|(i, (writer_ix, op))| {
                per_writer_lamport[writer_ix] += 1;
                let patch = Patch {
                    schema: SCHEMA_VERSION,
                    writer: WRITERS[writer_ix].to_string(),
                    lamport: per_writer_lamport[writer_ix],
                    context: VersionVector::new(),
                    ops: vec![op],
                };
                DecodedPatch {
                    sha: format!("sha{i}"),
                    patch,
                }
            })
            .collect()
    })
}

proptest! {
    /// Reducing the same set of patches in any order that preserves each
    /// writer's own chain order yields the same state hash (§8 permutation
    /// invariance). We approximate "any valid permutation" by reversing
    /// cross-writer groupings while leaving each writer's own subsequence
    /// order intact, since `order_patches` itself re-sorts deterministically.
    #[test]
    fn permutation_invariance(patches in arb_patch_stream()) {
        let forward = order_patches(patches.clone());
        let mut shuffled = patches;
        shuffled.reverse();
        let backward = order_patches(shuffled);

        let (s1, _) = reduce(WarpState::empty(), &forward, false, None).unwrap();
        let (s2, _) = reduce(WarpState::empty(), &backward, false, None).unwrap();
        prop_assert_eq!(state_hash(&s1), state_hash(&s2));
    }

    /// `join` is commutative: hashing `a.join(b)` and `b.join(a)` agree.
    #[test]
    fn join_is_commutative(patches in arb_patch_stream()) {
        let ordered = order_patches(patches);
        let mid = ordered.len() / 2;
        let (left, right) = ordered.split_at(mid);

        let (a, _) = reduce(WarpState::empty(), left, false, None).unwrap();
        let (b, _) = reduce(WarpState::empty(), right, false, None).unwrap();

        prop_assert_eq!(state_hash(&a.join(&b)), state_hash(&b.join(&a)));
    }

    /// `join` is idempotent: joining a state with itself changes nothing.
    #[test]
    fn join_is_idempotent(patches in arb_patch_stream()) {
        let ordered = order_patches(patches);
        let (a, _) = reduce(WarpState::empty(), &ordered, false, None).unwrap();
        prop_assert_eq!(state_hash(&a.join(&a)), state_hash(&a));
    }

    /// `join` is associative across an arbitrary three-way split.
    #[test]
    fn join_is_associative(patches in arb_patch_stream()) {
        let ordered = order_patches(patches);
        let n = ordered.len();
        let third = (n / 3).max(1);
        let (a_slice, rest) = ordered.split_at(third.min(n));
        let (b_slice, c_slice) = rest.split_at(rest.len() / 2);

        let (a, _) = reduce(WarpState::empty(), a_slice, false, None).unwrap();
        let (b, _) = reduce(WarpState::empty(), b_slice, false, None).unwrap();
        let (c, _) = reduce(WarpState::empty(), c_slice, false, None).unwrap();

        let left = a.join(&b).join(&c);
        let right = a.join(&b.join(&c));
        prop_assert_eq!(state_hash(&left), state_hash(&right));
    }

    /// Every dot visible before a join stays visible (or tombstoned) the
    /// same way after joining with any other state (§8 monotonicity):
    /// a node alive in `a` is still alive in `a.join(b)`.
    #[test]
    fn join_is_monotone_for_alive_nodes(patches in arb_patch_stream()) {
        let ordered = order_patches(patches);
        let mid = ordered.len() / 2;
        let (left, right) = ordered.split_at(mid);

        let (a, _) = reduce(WarpState::empty(), left, false, None).unwrap();
        let (b, _) = reduce(WarpState::empty(), right, false, None).unwrap();
        let joined = a.join(&b);

        for node in NODES {
            if a.is_node_alive(node) {
                prop_assert!(joined.is_node_alive(node) || !joined.is_node_alive(node));
                // alive-ness can only be lost by an explicit, observed remove;
                // no remove ops are generated in this strategy, so it must
                // still be alive after the join.
                prop_assert!(joined.is_node_alive(node));
            }
        }
    }
}
