//! Accumulates ops and publishes them via compare-and-swap on the writer
//! ref.

use crate::error::{Result, WarpError};
use crate::ident;
use crate::model::clock::{Dot, VersionVector};
use crate::model::value::PropertyValue;
use crate::objectstore::{CasOutcome, NewCommit, ObjectStore, Oid};
use crate::patch::{DecodedPatch, Op, Patch, PatchTrailer, PropScope, SCHEMA_VERSION};

/// The result of a successful [`PatchBuilder::commit`].
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub commit_sha: Oid,
    pub patch_oid: Oid,
    pub decoded: DecodedPatch,
}

/// Accumulates operations for one writer's next patch. `commit` is the only
/// method that touches the object store; everything else is in-memory
/// bookkeeping.
pub struct PatchBuilder {
    graph: String,
    writer: String,
    lamport: u64,
    context: VersionVector,
    expected_old_head: Option<Oid>,
    next_counter: u64,
    ops: Vec<Op>,
}

impl PatchBuilder {
    /// `observed_counter` is the writer's highest integrated dot counter so
    /// far (from the materialized frontier); new dots are allocated above
    /// it in commit order within this patch.
    pub fn new(
        graph: impl Into<String>,
        writer: impl Into<String>,
        lamport: u64,
        context: VersionVector,
        expected_old_head: Option<Oid>,
        observed_counter: u64,
    ) -> Self {
        Self {
            graph: graph.into(),
            writer: writer.into(),
            lamport,
            context,
            expected_old_head,
            next_counter: observed_counter,
            ops: Vec::new(),
        }
    }

    fn alloc_dot(&mut self) -> Dot {
        self.next_counter += 1;
        Dot::new(self.writer.clone(), self.next_counter)
    }

    pub fn add_node(&mut self, node: impl Into<String>) -> &mut Self {
        let dot = self.alloc_dot();
        self.ops.push(Op::NodeAdd { node: node.into(), dot });
        self
    }

    pub fn remove_node(&mut self, node: impl Into<String>, observed_dots: Vec<Dot>) -> &mut Self {
        self.ops.push(Op::NodeRemove {
            node: node.into(),
            observed_dots,
        });
        self
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>, label: impl Into<String>) -> &mut Self {
        let dot = self.alloc_dot();
        self.ops.push(Op::EdgeAdd {
            from: from.into(),
            to: to.into(),
            label: label.into(),
            dot,
        });
        self
    }

    pub fn remove_edge(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        label: impl Into<String>,
        observed_dots: Vec<Dot>,
    ) -> &mut Self {
        self.ops.push(Op::EdgeRemove {
            from: from.into(),
            to: to.into(),
            label: label.into(),
            observed_dots,
        });
        self
    }

    pub fn set_node_prop(&mut self, node: impl Into<String>, key: impl Into<String>, value: impl Into<PropertyValue>) -> &mut Self {
        self.ops.push(Op::PropSet {
            scope: PropScope::Node { node: node.into() },
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn set_edge_prop(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        label: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> &mut Self {
        self.ops.push(Op::PropSet {
            scope: PropScope::Edge {
                from: from.into(),
                to: to.into(),
                label: label.into(),
            },
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Encodes the patch, writes the blob, creates the commit, and
    /// CAS-updates the writer ref. On ref-advanced conflict the blob and
    /// commit remain as harmless garbage and the caller gets
    /// [`WarpError::WriterRefAdvanced`] naming the actual tip.
    pub async fn commit(self, store: &dyn ObjectStore) -> Result<CommitOutcome> {
        if self.ops.is_empty() {
            return Err(WarpError::EmptyPatch);
        }

        let patch = Patch {
            schema: SCHEMA_VERSION,
            writer: self.writer.clone(),
            lamport: self.lamport,
            context: self.context,
            ops: self.ops,
        };
        let bytes = patch.encode()?;
        let patch_oid = store.write_blob(&bytes).await?;

        let trailer = PatchTrailer {
            graph: self.graph.clone(),
            writer: self.writer.clone(),
            lamport: self.lamport,
            patch_oid: patch_oid.clone(),
            schema: SCHEMA_VERSION,
        };
        let parents = self.expected_old_head.iter().cloned().collect();
        let commit_sha = store
            .commit_node(NewCommit {
                message: trailer.render(),
                parents,
                tree: None,
                author: self.writer.clone(),
            })
            .await?;

        let ref_name = ident::refs::writer_tip(&self.graph, &self.writer);
        match store
            .compare_and_swap_ref(&ref_name, self.expected_old_head.as_ref(), &commit_sha)
            .await?
        {
            CasOutcome::Applied => Ok(CommitOutcome {
                commit_sha: commit_sha.clone(),
                patch_oid,
                decoded: DecodedPatch { sha: commit_sha, patch },
            }),
            CasOutcome::Conflict { actual } => Err(WarpError::WriterRefAdvanced {
                expected: self.expected_old_head.unwrap_or_default(),
                actual: actual.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectstore::memory::MemoryObjectStore;

    #[tokio::test]
    async fn commit_fails_on_empty_patch() {
        let store = MemoryObjectStore::new();
        let builder = PatchBuilder::new("g", "w1", 1, VersionVector::new(), None, 0);
        assert!(matches!(builder.commit(&store).await, Err(WarpError::EmptyPatch)));
    }

    #[tokio::test]
    async fn commit_succeeds_and_advances_ref() {
        let store = MemoryObjectStore::new();
        let mut builder = PatchBuilder::new("g", "w1", 1, VersionVector::new(), None, 0);
        builder.add_node("x");
        let outcome = builder.commit(&store).await.unwrap();
        assert_eq!(outcome.decoded.patch.ops.len(), 1);

        let tip = store.read_ref(&ident::refs::writer_tip("g", "w1")).await.unwrap();
        assert_eq!(tip, Some(outcome.commit_sha));
    }

    #[tokio::test]
    async fn cas_collision_names_actual_tip() {
        let store = MemoryObjectStore::new();
        let mut b1 = PatchBuilder::new("g", "w1", 1, VersionVector::new(), None, 0);
        b1.add_node("x");
        let first = b1.commit(&store).await.unwrap();

        let mut b2 = PatchBuilder::new("g", "w1", 2, VersionVector::new(), None, 1);
        b2.add_node("y");
        let second = b2.commit(&store).await.unwrap();

        // a third builder opened against the stale tip (as if it had begun
        // before `second` committed) must fail naming the actual tip.
        let mut stale = PatchBuilder::new("g", "w1", 3, VersionVector::new(), Some(first.commit_sha.clone()), 1);
        stale.add_node("z");
        match stale.commit(&store).await {
            Err(WarpError::WriterRefAdvanced { expected, actual }) => {
                assert_eq!(expected, first.commit_sha);
                assert_eq!(actual, second.commit_sha);
            }
            other => panic!("expected WriterRefAdvanced, got {other:?}"),
        }
    }
}
