//! Serializes a [`WarpState`] + frontier to a content-addressed tree and
//! commits it on the checkpoints ref.

use std::collections::BTreeMap;

use crate::error::{Result, WarpError};
use crate::ident;
use crate::model::clock::VersionVector;
use crate::objectstore::{NewCommit, ObjectStore};
use crate::patch::{CheckpointTrailer, SCHEMA_VERSION};
use crate::state::WarpState;
use crate::statehash::state_hash;

const STATE_ENTRY: &str = "state.cbor";
const FRONTIER_ENTRY: &str = "frontier.cbor";
const APPLIED_VV_ENTRY: &str = "appliedVV.cbor";

/// A loaded checkpoint: its materialized state, the per-writer frontier it
/// was created at, and the applied version vector.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub commit_sha: String,
    pub state: WarpState,
    /// writerId -> tip sha at checkpoint time.
    pub frontier: BTreeMap<String, String>,
    pub applied_vv: VersionVector,
    pub state_hash: String,
}

fn cbor_encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| WarpError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn cbor_decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| WarpError::Serialization(e.to_string()))
}

/// Creates a checkpoint commit for `graph` from `state`, `frontier` (tip
/// SHA per writer), and `applied_vv`, then updates
/// `refs/warp/<graph>/checkpoints/head` to point at it.
pub async fn create_checkpoint(
    store: &dyn ObjectStore,
    graph: &str,
    state: &WarpState,
    frontier: &BTreeMap<String, String>,
) -> Result<Checkpoint> {
    let hash = state_hash(state);

    let state_oid = store.write_blob(&cbor_encode(state)?).await?;
    let frontier_oid = store.write_blob(&cbor_encode(frontier)?).await?;
    let applied_vv_oid = store.write_blob(&cbor_encode(&state.observed_frontier)?).await?;

    let mut tree = BTreeMap::new();
    tree.insert(STATE_ENTRY.to_string(), state_oid);
    tree.insert(FRONTIER_ENTRY.to_string(), frontier_oid.clone());
    tree.insert(APPLIED_VV_ENTRY.to_string(), applied_vv_oid);
    let tree_oid = store.write_tree(&tree).await?;

    let trailer = CheckpointTrailer {
        graph: graph.to_string(),
        state_hash: hash.clone(),
        frontier_oid,
        index_oid: None,
        schema: SCHEMA_VERSION,
    };

    let checkpoint_ref = ident::refs::checkpoint_head(graph);
    let parent = store.read_ref(&checkpoint_ref).await?;
    let commit_sha = store
        .commit_node(NewCommit {
            message: trailer.render(),
            parents: parent.into_iter().collect(),
            tree: Some(tree_oid),
            author: "warpgraph".to_string(),
        })
        .await?;
    store.update_ref(&checkpoint_ref, &commit_sha).await?;

    Ok(Checkpoint {
        commit_sha,
        state: state.clone(),
        frontier: frontier.clone(),
        applied_vv: state.observed_frontier.clone(),
        state_hash: hash,
    })
}

/// Loads the checkpoint currently referenced by
/// `refs/warp/<graph>/checkpoints/head`, or `None` if none exists yet.
pub async fn load_checkpoint(store: &dyn ObjectStore, graph: &str) -> Result<Option<Checkpoint>> {
    let checkpoint_ref = ident::refs::checkpoint_head(graph);
    let Some(commit_sha) = store.read_ref(&checkpoint_ref).await? else {
        return Ok(None);
    };
    let info = store.get_node_info(&commit_sha).await?;
    let trailer = CheckpointTrailer::parse(&info.message)?;

    let Some(tree_oid) = info.tree else {
        return Err(WarpError::MalformedPatch {
            sha: commit_sha,
            reason: "checkpoint commit carries no tree".to_string(),
        });
    };
    let entries = store.read_tree_oids(&tree_oid).await?;

    let state_bytes = store.read_blob(entry(&entries, STATE_ENTRY)?).await?;
    let state: WarpState = cbor_decode(&state_bytes)?;

    let frontier_bytes = store.read_blob(entry(&entries, FRONTIER_ENTRY)?).await?;
    let frontier: BTreeMap<String, String> = cbor_decode(&frontier_bytes)?;

    let applied_vv_bytes = store.read_blob(entry(&entries, APPLIED_VV_ENTRY)?).await?;
    let applied_vv: VersionVector = cbor_decode(&applied_vv_bytes)?;

    let computed = state_hash(&state);
    if computed != trailer.state_hash {
        return Err(WarpError::StateHashMismatch {
            expected: trailer.state_hash,
            computed,
        });
    }

    Ok(Some(Checkpoint {
        commit_sha,
        state,
        frontier,
        applied_vv,
        state_hash: computed,
    }))
}

fn entry<'a>(entries: &'a BTreeMap<String, String>, name: &str) -> Result<&'a String> {
    entries
        .get(name)
        .ok_or_else(|| WarpError::MalformedPatch {
            sha: String::new(),
            reason: format!("checkpoint tree missing entry {name}"),
        })
}
