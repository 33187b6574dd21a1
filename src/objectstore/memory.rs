//! An in-memory [`ObjectStore`] adapter, suitable for tests and as a
//! reference for what a real backend's content-addressing must guarantee.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};

use crate::error::{Result, WarpError};
use crate::ident;

use super::{CasOutcome, CommitInfo, NewCommit, ObjectStore, Oid, PingInfo};

#[derive(Debug, Clone)]
struct CommitRecord {
    message: String,
    parents: Vec<Oid>,
    tree: Option<Oid>,
    author: String,
    date: String,
}

#[derive(Default)]
struct Inner {
    blobs: HashMap<Oid, Vec<u8>>,
    trees: HashMap<Oid, BTreeMap<String, Oid>>,
    commits: HashMap<Oid, CommitRecord>,
    refs: HashMap<String, Oid>,
    config: HashMap<String, String>,
}

/// A process-local object store backed by hash maps. Oids are SHA-1 hex
/// digests over the object's canonical byte content, mirroring the
/// hex40 width the commit-message trailer format expects for patch oids.
pub struct MemoryObjectStore {
    inner: Mutex<Inner>,
    clock: AtomicU64,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock: AtomicU64::new(0),
        }
    }

    fn next_tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn tree_bytes(entries: &BTreeMap<String, Oid>) -> Vec<u8> {
    let mut buf = Vec::new();
    for (path, oid) in entries {
        buf.extend_from_slice(path.as_bytes());
        buf.push(0);
        buf.extend_from_slice(oid.as_bytes());
        buf.push(0);
    }
    buf
}

fn commit_bytes(commit: &NewCommit, tick: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(commit.message.as_bytes());
    buf.push(0);
    for parent in &commit.parents {
        buf.extend_from_slice(parent.as_bytes());
        buf.push(0);
    }
    if let Some(tree) = &commit.tree {
        buf.extend_from_slice(tree.as_bytes());
    }
    buf.push(0);
    buf.extend_from_slice(commit.author.as_bytes());
    // the tick breaks ties between structurally identical commits (e.g.
    // two empty-context first patches from different writers racing),
    // which real content-addressed backends avoid via timestamps.
    buf.extend_from_slice(&tick.to_be_bytes());
    buf
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn write_blob(&self, bytes: &[u8]) -> Result<Oid> {
        let oid = sha1_hex(bytes);
        self.inner.lock().blobs.insert(oid.clone(), bytes.to_vec());
        Ok(oid)
    }

    async fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>> {
        self.inner
            .lock()
            .blobs
            .get(oid)
            .cloned()
            .ok_or_else(|| WarpError::ObjectStore(format!("blob {oid} not found")))
    }

    async fn write_tree(&self, entries: &BTreeMap<String, Oid>) -> Result<Oid> {
        let oid = sha1_hex(&tree_bytes(entries));
        self.inner.lock().trees.insert(oid.clone(), entries.clone());
        Ok(oid)
    }

    async fn read_tree_oids(&self, tree_oid: &Oid) -> Result<BTreeMap<String, Oid>> {
        self.inner
            .lock()
            .trees
            .get(tree_oid)
            .cloned()
            .ok_or_else(|| WarpError::ObjectStore(format!("tree {tree_oid} not found")))
    }

    async fn commit_node(&self, commit: NewCommit) -> Result<Oid> {
        let tick = self.next_tick();
        let oid = sha1_hex(&commit_bytes(&commit, tick));
        let mut inner = self.inner.lock();
        inner.commits.insert(
            oid.clone(),
            CommitRecord {
                message: commit.message,
                parents: commit.parents,
                tree: commit.tree,
                author: commit.author,
                date: tick.to_string(),
            },
        );
        Ok(oid)
    }

    async fn get_node_info(&self, sha: &Oid) -> Result<CommitInfo> {
        let inner = self.inner.lock();
        let record = inner
            .commits
            .get(sha)
            .ok_or_else(|| WarpError::ObjectStore(format!("commit {sha} not found")))?;
        Ok(CommitInfo {
            sha: sha.clone(),
            message: record.message.clone(),
            parents: record.parents.clone(),
            tree: record.tree.clone(),
            author: record.author.clone(),
            date: record.date.clone(),
        })
    }

    async fn read_ref(&self, r: &str) -> Result<Option<Oid>> {
        ident::validate_ref(r)?;
        Ok(self.inner.lock().refs.get(r).cloned())
    }

    async fn update_ref(&self, r: &str, oid: &Oid) -> Result<()> {
        ident::validate_ref(r)?;
        self.inner.lock().refs.insert(r.to_string(), oid.clone());
        Ok(())
    }

    async fn delete_ref(&self, r: &str) -> Result<()> {
        self.inner.lock().refs.remove(r);
        Ok(())
    }

    async fn list_refs(&self, prefix: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        let mut out: Vec<String> = inner.refs.keys().filter(|r| r.starts_with(prefix)).cloned().collect();
        out.sort();
        Ok(out)
    }

    async fn compare_and_swap_ref(&self, r: &str, expected: Option<&Oid>, new: &Oid) -> Result<CasOutcome> {
        ident::validate_ref(r)?;
        let mut inner = self.inner.lock();
        let actual = inner.refs.get(r).cloned();
        if actual.as_ref() != expected {
            return Ok(CasOutcome::Conflict { actual });
        }
        inner.refs.insert(r.to_string(), new.clone());
        Ok(CasOutcome::Applied)
    }

    async fn config_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().config.get(key).cloned())
    }

    async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.lock().config.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<PingInfo> {
        Ok(PingInfo { ok: true, latency_ms: 0 })
    }

    async fn node_exists(&self, sha: &Oid) -> Result<bool> {
        Ok(self.inner.lock().commits.contains_key(sha))
    }

    async fn is_ancestor(&self, ancestor: &Oid, descendant: &Oid) -> Result<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        let inner = self.inner.lock();
        let mut queue: VecDeque<Oid> = VecDeque::new();
        queue.push_back(descendant.clone());
        let mut seen = std::collections::HashSet::new();
        while let Some(sha) = queue.pop_front() {
            if !seen.insert(sha.clone()) {
                continue;
            }
            let Some(record) = inner.commits.get(&sha) else {
                continue;
            };
            for parent in &record.parents {
                if parent == ancestor {
                    return Ok(true);
                }
                queue.push_back(parent.clone());
            }
        }
        Ok(false)
    }
}
