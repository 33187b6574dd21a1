//! The minimal content-addressed object-store contract (§6). The backend
//! itself — commits, trees, blobs, refs, the hooks that install them — is
//! an external collaborator; this module only defines the trait the rest
//! of the engine programs against, plus an in-memory adapter for tests.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;

/// A content-addressed object id: a hex string, 4-64 characters.
pub type Oid = String;

/// Metadata describing a commit node. `tree` is `None` for patch commits
/// (which carry their payload in the message trailer, not a tree) and
/// `Some` for checkpoint commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: Oid,
    pub message: String,
    pub parents: Vec<Oid>,
    pub tree: Option<Oid>,
    pub author: String,
    pub date: String,
}

/// A commit to be created. `tree` is `None` for patch commits (the patch
/// blob is referenced from the message trailer, not a tree) and `Some` for
/// checkpoint commits.
#[derive(Debug, Clone)]
pub struct NewCommit {
    pub message: String,
    pub parents: Vec<Oid>,
    pub tree: Option<Oid>,
    pub author: String,
}

/// Round-trip latency probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingInfo {
    pub ok: bool,
    pub latency_ms: u64,
}

/// Outcome of a compare-and-swap ref update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    Conflict { actual: Option<Oid> },
}

/// The object-store adapter contract. Implementations are expected to be
/// reentrant: multiple in-process `WarpGraph` instances may share one
/// adapter safely (§5).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn write_blob(&self, bytes: &[u8]) -> Result<Oid>;
    async fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>>;
    async fn write_tree(&self, entries: &BTreeMap<String, Oid>) -> Result<Oid>;
    async fn read_tree_oids(&self, tree_oid: &Oid) -> Result<BTreeMap<String, Oid>>;
    async fn commit_node(&self, commit: NewCommit) -> Result<Oid>;
    async fn get_node_info(&self, sha: &Oid) -> Result<CommitInfo>;
    async fn read_ref(&self, r: &str) -> Result<Option<Oid>>;
    async fn update_ref(&self, r: &str, oid: &Oid) -> Result<()>;
    async fn delete_ref(&self, r: &str) -> Result<()>;
    async fn list_refs(&self, prefix: &str) -> Result<Vec<String>>;
    async fn compare_and_swap_ref(&self, r: &str, expected: Option<&Oid>, new: &Oid) -> Result<CasOutcome>;
    async fn config_get(&self, key: &str) -> Result<Option<String>>;
    async fn config_set(&self, key: &str, value: &str) -> Result<()>;
    async fn ping(&self) -> Result<PingInfo>;
    async fn node_exists(&self, sha: &Oid) -> Result<bool>;
    /// True iff `ancestor` is reachable from `descendant` by following
    /// parent links (inclusive of `descendant == ancestor`).
    async fn is_ancestor(&self, ancestor: &Oid, descendant: &Oid) -> Result<bool>;
}
