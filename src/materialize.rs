//! Walks writer chains, optionally starting from a checkpoint, applies a
//! Lamport ceiling, and memoizes on `(frontierHash, ceiling)`.

use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::abort::AbortSignal;
use crate::checkpoint::{self, Checkpoint};
use crate::error::Result;
use crate::model::keycodec;
use crate::objectstore::ObjectStore;
use crate::patch::{DecodedPatch, PatchTrailer};
use crate::reduce::{self, PatchReceipt};
use crate::state::WarpState;
use crate::statehash::state_hash;

/// Per-writer tip SHAs requested for a materialization.
pub type WriterTips = BTreeMap<String, String>;

/// Forward and reverse adjacency over the *logical* graph, derived from a
/// materialized [`WarpState`]. Used by query/traversal to avoid rescanning
/// `edgeAlive` on every neighbor lookup within one materialization.
#[derive(Debug, Clone, Default)]
pub struct Adjacency {
    pub forward: BTreeMap<String, BTreeSet<(String, String)>>,
    pub reverse: BTreeMap<String, BTreeSet<(String, String)>>,
}

fn build_adjacency(state: &WarpState) -> Adjacency {
    let mut adjacency = Adjacency::default();
    for edge_key in state.edge_alive.iter_visible() {
        let Some((from, to, label)) = keycodec::decode_edge_key(edge_key) else {
            continue;
        };
        adjacency
            .forward
            .entry(from.to_string())
            .or_default()
            .insert((to.to_string(), label.to_string()));
        adjacency
            .reverse
            .entry(to.to_string())
            .or_default()
            .insert((from.to_string(), label.to_string()));
    }
    adjacency
}

/// Hashes the sorted per-writer tip map; the cache key's first component.
pub fn frontier_hash(tips: &WriterTips) -> String {
    let mut hasher = Sha256::new();
    for (writer, sha) in tips {
        hasher.update((writer.len() as u64).to_be_bytes());
        hasher.update(writer.as_bytes());
        hasher.update((sha.len() as u64).to_be_bytes());
        hasher.update(sha.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Per-writer Lamport histogram plus the global set of distinct ticks,
/// returned by [`MaterializationService::discover_ticks`].
#[derive(Debug, Clone, Default)]
pub struct DiscoverTicks {
    pub all_ticks: BTreeSet<u64>,
    pub per_writer: BTreeMap<String, BTreeMap<u64, u32>>,
}

/// The result of a materialize call.
pub struct Materialized {
    pub state: WarpState,
    pub receipts: Option<Vec<PatchReceipt>>,
}

/// Walks writer chains and memoizes materialized states and adjacency.
pub struct MaterializationService {
    cache: Mutex<LruCache<(String, Option<u64>), WarpState>>,
    adjacency_cache: Mutex<LruCache<String, Adjacency>>,
}

impl MaterializationService {
    pub fn new(materialize_cache_size: usize, adjacency_cache_size: usize) -> Self {
        let cap = |n: usize| NonZeroUsize::new(n.max(1)).expect("cache size must be > 0 after max(1)");
        Self {
            cache: Mutex::new(LruCache::new(cap(materialize_cache_size))),
            adjacency_cache: Mutex::new(LruCache::new(cap(adjacency_cache_size))),
        }
    }

    /// Drops all cached materializations and adjacency maps. Called on
    /// commit, sync-apply, and checkpoint install (§4.3).
    pub fn invalidate(&self) {
        self.cache.lock().clear();
        self.adjacency_cache.lock().clear();
    }

    /// Returns the cached forward/reverse adjacency for a materialized
    /// state, building and caching it on first access for this state hash.
    pub fn adjacency_for(&self, state: &WarpState) -> Adjacency {
        let hash = state_hash(state);
        if let Some(cached) = self.adjacency_cache.lock().get(&hash) {
            return cached.clone();
        }
        let built = build_adjacency(state);
        self.adjacency_cache.lock().put(hash, built.clone());
        built
    }

    /// Materializes state for `tips`, optionally bounded by `ceiling` and
    /// optionally carrying receipts. Receipts bypass the cache entirely.
    pub async fn materialize(
        &self,
        store: &dyn ObjectStore,
        graph: &str,
        tips: &WriterTips,
        ceiling: Option<u64>,
        receipts_enabled: bool,
        abort: Option<&AbortSignal>,
    ) -> Result<Materialized> {
        let hash = frontier_hash(tips);
        if !receipts_enabled {
            if let Some(cached) = self.cache.lock().get(&(hash.clone(), ceiling)) {
                return Ok(Materialized {
                    state: cached.clone(),
                    receipts: None,
                });
            }
        }

        let checkpoint = checkpoint::load_checkpoint(store, graph).await?;
        let (initial, floor, fast_started) = match &checkpoint {
            Some(cp) if checkpoint_dominated_by(store, cp, ceiling).await? => {
                (cp.state.clone(), checkpoint_floor(store, cp).await?, true)
            }
            _ => (WarpState::empty(), BTreeMap::new(), false),
        };
        let _ = fast_started;

        let mut patches: Vec<DecodedPatch> = Vec::new();
        for (writer, tip) in tips {
            if let Some(signal) = abort {
                signal.check()?;
            }
            let writer_floor = floor.get(writer).copied().unwrap_or(0);
            patches.extend(walk_writer_chain(store, tip, writer_floor, ceiling, abort).await?);
        }
        let ordered = reduce::order_patches(patches);
        let (state, receipts) = reduce::reduce(initial, &ordered, receipts_enabled, abort)?;

        if !receipts_enabled {
            self.cache.lock().put((hash, ceiling), state.clone());
        }

        Ok(Materialized { state, receipts })
    }

    /// Lists all distinct Lamport ticks across every writer's full chain,
    /// with a per-writer histogram, so a caller can pick a valid ceiling.
    pub async fn discover_ticks(&self, store: &dyn ObjectStore, tips: &WriterTips) -> Result<DiscoverTicks> {
        let mut result = DiscoverTicks::default();
        for (writer, tip) in tips {
            let mut sha = Some(tip.clone());
            let mut histogram = BTreeMap::new();
            while let Some(current) = sha {
                let info = store.get_node_info(&current).await?;
                let trailer = PatchTrailer::parse(&info.message)?;
                *histogram.entry(trailer.lamport).or_insert(0) += 1;
                result.all_ticks.insert(trailer.lamport);
                sha = info.parents.first().cloned();
            }
            result.per_writer.insert(writer.clone(), histogram);
        }
        Ok(result)
    }
}

/// True iff `ceiling` is unset, or every writer recorded in the
/// checkpoint's frontier has a lamport `<= ceiling` at the checkpoint's tip.
async fn checkpoint_dominated_by(store: &dyn ObjectStore, cp: &Checkpoint, ceiling: Option<u64>) -> Result<bool> {
    let Some(c) = ceiling else {
        return Ok(true);
    };
    for tip in cp.frontier.values() {
        let info = store.get_node_info(tip).await?;
        let trailer = PatchTrailer::parse(&info.message)?;
        if trailer.lamport > c {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Per-writer lamport recorded at checkpoint time, the point at which the
/// chain walk should stop when fast-starting from this checkpoint.
async fn checkpoint_floor(store: &dyn ObjectStore, cp: &Checkpoint) -> Result<BTreeMap<String, u64>> {
    let mut floor = BTreeMap::new();
    for (writer, tip) in &cp.frontier {
        let info = store.get_node_info(tip).await?;
        let trailer = PatchTrailer::parse(&info.message)?;
        floor.insert(writer.clone(), trailer.lamport);
    }
    Ok(floor)
}

/// Walks a single writer's chain from `tip` toward the root, collecting
/// patches with lamport in `(floor, ceiling]` (ceiling unbounded if `None`).
/// Stops at `floor` or at a null parent link.
async fn walk_writer_chain(
    store: &dyn ObjectStore,
    tip: &str,
    floor: u64,
    ceiling: Option<u64>,
    abort: Option<&AbortSignal>,
) -> Result<Vec<DecodedPatch>> {
    let mut collected = Vec::new();
    let mut sha = Some(tip.to_string());
    while let Some(current) = sha {
        if let Some(signal) = abort {
            signal.check()?;
        }
        let info = store.get_node_info(&current).await?;
        let trailer = PatchTrailer::parse(&info.message)?;
        if trailer.lamport <= floor {
            break;
        }
        if ceiling.map_or(true, |c| trailer.lamport <= c) {
            let bytes = store.read_blob(&trailer.patch_oid).await?;
            let patch = crate::patch::Patch::decode(&bytes)?;
            collected.push(DecodedPatch { sha: current.clone(), patch });
        }
        sha = info.parents.first().cloned();
    }
    Ok(collected)
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
    async fn time_travel_ceiling_scenario() {
        let store = MemoryObjectStore::new();
        let c1 = commit_node(&store, "g", "w1", 1, None, "n1").await;
        let c2 = commit_node(&store, "g", "w1", 2, Some(c1), "n2").await;
        let c3 = commit_node(&store, "g", "w1", 3, Some(c2), "n3").await;

        let service = MaterializationService::new(16, 16);
        let mut tips = WriterTips::new();
        tips.insert("w1".to_string(), c3.clone());

        let at_2 = service.materialize(&store, "g", &tips, Some(2), false, None).await.unwrap();
        assert!(at_2.state.is_node_alive("n1"));
        assert!(at_2.state.is_node_alive("n2"));
        assert!(!at_2.state.is_node_alive("n3"));

        let at_0 = service.materialize(&store, "g", &tips, Some(0), false, None).await.unwrap();
        assert!(!at_0.state.is_node_alive("n1"));

        let at_999 = service.materialize(&store, "g", &tips, Some(999), false, None).await.unwrap();
        let default = service.materialize(&store, "g", &tips, None, false, None).await.unwrap();
        assert_eq!(state_hash(&at_999.state), state_hash(&default.state));
    }

    #[tokio::test]
    async fn discover_ticks_lists_all_lamports() {
        let store = MemoryObjectStore::new();
        let c1 = commit_node(&store, "g", "w1", 1, None, "n1").await;
        let _c2 = commit_node(&store, "g", "w1", 2, Some(c1.clone()), "n2").await;

        let service = MaterializationService::new(16, 16);
        let mut tips = WriterTips::new();
        tips.insert("w1".to_string(), commit_node(&store, "g", "w1", 2, Some(c1), "n2dup").await);
        let ticks = service.discover_ticks(&store, &tips).await.unwrap();
        assert!(ticks.all_ticks.contains(&1));
        assert!(ticks.all_ticks.contains(&2));
    }
}
