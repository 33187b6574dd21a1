//! Forks a writer's history into a new graph at a chosen ancestor commit.

use crate::error::{Result, WarpError};
use crate::ident;
use crate::objectstore::{Oid, ObjectStore};

/// Parameters for [`fork`].
pub struct ForkRequest {
    pub from_graph: String,
    pub from_writer: String,
    pub at: Oid,
    pub fork_graph: String,
    pub fork_writer_id: Option<String>,
}

/// The outcome of a successful fork: the new graph/writer pair and the ref
/// it was created on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkOutcome {
    pub fork_writer_id: String,
    pub writer_ref: String,
}

/// Validates and performs a fork: `from_writer` in `from_graph` must exist,
/// `at` must be an ancestor of (or equal to) that writer's current tip, and
/// `fork_graph` must not already have any writer refs. History is shared
/// via content-addressing — no commits are copied, only a new ref is
/// created pointing at `at`.
pub async fn fork(store: &dyn ObjectStore, request: ForkRequest) -> Result<ForkOutcome> {
    ident::validate_graph_name(&request.fork_graph)?;
    ident::validate_writer_id(&request.from_writer)?;
    ident::validate_oid(&request.at)?;

    let source_ref = ident::refs::writer_tip(&request.from_graph, &request.from_writer);
    let tip = store
        .read_ref(&source_ref)
        .await?
        .ok_or_else(|| WarpError::ForkWriterNotFound(request.from_writer.clone()))?;

    if !store.node_exists(&request.at).await? {
        return Err(WarpError::ForkPatchNotFound(request.at.clone()));
    }
    if !store.is_ancestor(&request.at, &tip).await? {
        return Err(WarpError::ForkPatchNotInChain(request.at.clone()));
    }

    let existing = store.list_refs(&format!("refs/warp/{}/", request.fork_graph)).await?;
    if !existing.is_empty() {
        return Err(WarpError::ForkAlreadyExists(request.fork_graph.clone()));
    }

    let fork_writer_id = match request.fork_writer_id {
        Some(id) => {
            ident::validate_writer_id(&id)?;
            id
        }
        None => ident::generate_writer_id(),
    };

    let writer_ref = ident::refs::writer_tip(&request.fork_graph, &fork_writer_id);
    store.update_ref(&writer_ref, &request.at).await?;

    Ok(ForkOutcome { fork_writer_id, writer_ref })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::clock::VersionVector;
    use crate::objectstore::memory::MemoryObjectStore;
    use crate::patchbuilder::PatchBuilder;

    async fn commit_node(store: &MemoryObjectStore, graph: &str, writer: &str, lamport: u64, parent: Option<String>, node: &str) -> String {
        let mut builder = PatchBuilder::new(graph, writer, lamport, VersionVector::new(), parent, lamport.saturating_sub(1));
        builder.add_node(node);
        builder.commit(store).await.unwrap().commit_sha
    }

    #[tokio::test]
    async fn forks_at_ancestor_commit() {
        let store = MemoryObjectStore::new();
        let c1 = commit_node(&store, "g", "w1", 1, None, "n1").await;
        let _c2 = commit_node(&store, "g", "w1", 2, Some(c1.clone()), "n2").await;

        let outcome = fork(
            &store,
            ForkRequest {
                from_graph: "g".to_string(),
                from_writer: "w1".to_string(),
                at: c1.clone(),
                fork_graph: "g-fork".to_string(),
                fork_writer_id: Some("w_forked".to_string()),
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.fork_writer_id, "w_forked");
        assert_eq!(store.read_ref(&outcome.writer_ref).await.unwrap(), Some(c1));
    }

    #[tokio::test]
    async fn rejects_unknown_writer() {
        let store = MemoryObjectStore::new();
        let err = fork(
            &store,
            ForkRequest {
                from_graph: "g".to_string(),
                from_writer: "ghost".to_string(),
                at: "a".repeat(8),
                fork_graph: "g-fork".to_string(),
                fork_writer_id: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WarpError::ForkWriterNotFound(_)));
    }

    #[tokio::test]
    async fn rejects_anchor_not_in_chain() {
        let store = MemoryObjectStore::new();
        let _c1 = commit_node(&store, "g", "w1", 1, None, "n1").await;
        let unrelated = commit_node(&store, "g", "w2", 1, None, "n2").await;

        let err = fork(
            &store,
            ForkRequest {
                from_graph: "g".to_string(),
                from_writer: "w1".to_string(),
                at: unrelated,
                fork_graph: "g-fork".to_string(),
                fork_writer_id: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WarpError::ForkPatchNotInChain(_)));
    }

    #[tokio::test]
    async fn rejects_existing_fork_target() {
        let store = MemoryObjectStore::new();
        let c1 = commit_node(&store, "g", "w1", 1, None, "n1").await;
        store.update_ref(&ident::refs::writer_tip("g-fork", "other"), &c1).await.unwrap();

        let err = fork(
            &store,
            ForkRequest {
                from_graph: "g".to_string(),
                from_writer: "w1".to_string(),
                at: c1,
                fork_graph: "g-fork".to_string(),
                fork_writer_id: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WarpError::ForkAlreadyExists(_)));
    }
}
