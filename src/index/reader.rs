//! Reads a sharded bitmap index, loading shard blobs lazily on first access
//! and validating their checksums.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use roaring::RoaringBitmap;
use sha2::{Digest, Sha256};

use crate::error::{Result, WarpError};
use crate::objectstore::ObjectStore;

use super::{fwd_shard_entry, rev_shard_entry, IndexMeta, CODEC_VERSION, META_IDS_ENTRY, META_INFO_ENTRY};

type ShardContents = Vec<(u32, RoaringBitmap)>;

/// A loaded bitmap index, lazily fetching forward/reverse shards as
/// lookups touch them.
pub struct BitmapIndexReader {
    store: Arc<dyn ObjectStore>,
    tree_entries: BTreeMap<String, String>,
    meta: IndexMeta,
    ids: Vec<String>,
    id_of: HashMap<String, u32>,
    fwd_shards: Mutex<HashMap<u32, Arc<ShardContents>>>,
    rev_shards: Mutex<HashMap<u32, Arc<ShardContents>>>,
}

impl BitmapIndexReader {
    /// Reads the meta entries eagerly; shard blobs are loaded lazily.
    pub async fn load(store: Arc<dyn ObjectStore>, tree_oid: &str) -> Result<Self> {
        let tree_entries = store.read_tree_oids(&tree_oid.to_string()).await?;

        let meta_oid = entry(&tree_entries, META_INFO_ENTRY)?;
        let meta_bytes = store.read_blob(meta_oid).await?;
        let meta: IndexMeta = ciborium::from_reader(meta_bytes.as_slice())
            .map_err(|e| WarpError::ShardCorruptionError { shard: META_INFO_ENTRY.to_string(), reason: e.to_string() })?;
        if meta.codec_version != CODEC_VERSION {
            return Err(WarpError::ShardValidationError {
                shard: META_INFO_ENTRY.to_string(),
                reason: format!("unsupported codec version {}", meta.codec_version),
            });
        }
        if meta.fwd_checksums.len() != meta.shard_count as usize || meta.rev_checksums.len() != meta.shard_count as usize {
            return Err(WarpError::ShardValidationError {
                shard: META_INFO_ENTRY.to_string(),
                reason: "checksum list length does not match shard count".to_string(),
            });
        }

        let ids_oid = entry(&tree_entries, META_IDS_ENTRY)?;
        let ids_bytes = store.read_blob(ids_oid).await?;
        let ids: Vec<String> = ciborium::from_reader(ids_bytes.as_slice())
            .map_err(|e| WarpError::ShardCorruptionError { shard: META_IDS_ENTRY.to_string(), reason: e.to_string() })?;
        let id_of = ids.iter().enumerate().map(|(i, s)| (s.clone(), i as u32)).collect();

        Ok(Self {
            store,
            tree_entries,
            meta,
            ids,
            id_of,
            fwd_shards: Mutex::new(HashMap::new()),
            rev_shards: Mutex::new(HashMap::new()),
        })
    }

    pub fn node_count(&self) -> u32 {
        self.meta.n
    }

    pub fn id_of(&self, node_id: &str) -> Option<u32> {
        self.id_of.get(node_id).copied()
    }

    pub fn node_of(&self, id: u32) -> Option<&str> {
        self.ids.get(id as usize).map(String::as_str)
    }

    /// Outgoing neighbor ids for `node_id`; empty if the node is unindexed.
    pub async fn forward(&self, node_id: &str) -> Result<Vec<String>> {
        self.neighbors(node_id, true).await
    }

    /// Incoming neighbor ids for `node_id`; empty if the node is unindexed.
    pub async fn reverse(&self, node_id: &str) -> Result<Vec<String>> {
        self.neighbors(node_id, false).await
    }

    async fn neighbors(&self, node_id: &str, forward: bool) -> Result<Vec<String>> {
        let Some(id) = self.id_of(node_id) else {
            return Ok(Vec::new());
        };
        let shard_idx = self.meta.shard_of(id);
        let shard = self.load_shard(forward, shard_idx).await?;
        let (shard_start, _) = self.meta.shard_range(shard_idx);
        let local = id - shard_start;
        let bitmap = shard
            .iter()
            .find(|(local_id, _)| *local_id == local)
            .map(|(_, bitmap)| bitmap);
        Ok(match bitmap {
            Some(bitmap) => bitmap.iter().filter_map(|target| self.node_of(target).map(str::to_string)).collect(),
            None => Vec::new(),
        })
    }

    async fn load_shard(&self, forward: bool, shard: u32) -> Result<Arc<ShardContents>> {
        let cache = if forward { &self.fwd_shards } else { &self.rev_shards };
        if let Some(cached) = cache.lock().get(&shard) {
            return Ok(cached.clone());
        }

        let entry_name = if forward { fwd_shard_entry(shard) } else { rev_shard_entry(shard) };
        let checksums = if forward { &self.meta.fwd_checksums } else { &self.meta.rev_checksums };
        let expected_checksum = checksums.get(shard as usize).ok_or_else(|| WarpError::ShardValidationError {
            shard: entry_name.clone(),
            reason: "shard index out of range for checksum list".to_string(),
        })?;

        let oid = entry(&self.tree_entries, &entry_name)?;
        let bytes = self
            .store
            .read_blob(oid)
            .await
            .map_err(|e| WarpError::ShardLoadError {
                shard: entry_name.clone(),
                source: Box::new(e),
            })?;

        let actual_checksum = sha256_hex(&bytes);
        if &actual_checksum != expected_checksum {
            return Err(WarpError::ShardValidationError {
                shard: entry_name.clone(),
                reason: format!("checksum mismatch: expected {expected_checksum}, got {actual_checksum}"),
            });
        }

        let contents: ShardContents = ciborium::from_reader(bytes.as_slice()).map_err(|e| WarpError::ShardCorruptionError {
            shard: entry_name.clone(),
            reason: e.to_string(),
        })?;
        let contents = Arc::new(contents);
        cache.lock().insert(shard, contents.clone());
        Ok(contents)
    }
}

fn entry<'a>(entries: &'a BTreeMap<String, String>, name: &str) -> Result<&'a String> {
    entries.get(name).ok_or_else(|| WarpError::ShardValidationError {
        shard: name.to_string(),
        reason: "tree entry missing".to_string(),
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
