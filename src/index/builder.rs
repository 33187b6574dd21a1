//! Builds a sharded bitmap index from a materialized [`WarpState`].

use std::collections::{BTreeMap, HashMap};

use roaring::RoaringBitmap;
use sha2::{Digest, Sha256};

use crate::error::{Result, WarpError};
use crate::model::keycodec;
use crate::objectstore::ObjectStore;
use crate::state::WarpState;

use super::{fwd_shard_entry, rev_shard_entry, IndexMeta, CODEC_VERSION, META_IDS_ENTRY, META_INFO_ENTRY};

/// One shard's contents: `(local id within the shard) -> bitmap`, ordered
/// by local id.
type ShardContents = Vec<(u32, RoaringBitmap)>;

/// Builds the compact id assignment and forward/reverse bitmaps for a
/// [`WarpState`], then serializes them into a content-addressed tree.
pub struct WarpStateIndexBuilder {
    shard_count: u32,
}

impl WarpStateIndexBuilder {
    pub fn new(shard_count: u32) -> Self {
        Self {
            shard_count: shard_count.max(1),
        }
    }

    /// Builds the index for `state` and writes it to `store`, returning the
    /// tree oid to record on a checkpoint's `eg-index-oid` trailer field.
    pub async fn build(&self, store: &dyn ObjectStore, state: &WarpState) -> Result<String> {
        let ids: Vec<&String> = state.node_alive.iter_visible().collect();
        let n = ids.len() as u32;
        let id_of: HashMap<&str, u32> = ids.iter().enumerate().map(|(i, s)| (s.as_str(), i as u32)).collect();

        let mut forward: Vec<RoaringBitmap> = (0..n).map(|_| RoaringBitmap::new()).collect();
        let mut reverse: Vec<RoaringBitmap> = (0..n).map(|_| RoaringBitmap::new()).collect();

        for edge_key in state.edge_alive.iter_visible() {
            let Some((from, to, _label)) = keycodec::decode_edge_key(edge_key) else {
                continue;
            };
            let (Some(&from_id), Some(&to_id)) = (id_of.get(from), id_of.get(to)) else {
                continue;
            };
            forward[from_id as usize].insert(to_id);
            reverse[to_id as usize].insert(from_id);
        }

        let shard_count = self.shard_count.min(n.max(1));
        let meta_skeleton = IndexMeta {
            n,
            shard_count,
            codec_version: CODEC_VERSION,
            fwd_checksums: Vec::new(),
            rev_checksums: Vec::new(),
        };

        let mut fwd_checksums = Vec::new();
        let mut rev_checksums = Vec::new();
        let mut tree = BTreeMap::new();

        for shard in 0..shard_count {
            let (start, end) = meta_skeleton.shard_range(shard);
            let fwd_shard: ShardContents = (start..end).map(|id| (id, forward[id as usize].clone())).collect();
            let rev_shard: ShardContents = (start..end).map(|id| (id, reverse[id as usize].clone())).collect();

            let fwd_bytes = cbor_encode(&fwd_shard)?;
            let rev_bytes = cbor_encode(&rev_shard)?;
            fwd_checksums.push(checksum(&fwd_bytes));
            rev_checksums.push(checksum(&rev_bytes));

            let fwd_oid = store.write_blob(&fwd_bytes).await?;
            let rev_oid = store.write_blob(&rev_bytes).await?;
            tree.insert(fwd_shard_entry(shard), fwd_oid);
            tree.insert(rev_shard_entry(shard), rev_oid);
        }

        let meta = IndexMeta {
            fwd_checksums,
            rev_checksums,
            ..meta_skeleton
        };
        let sorted_ids: Vec<String> = ids.into_iter().cloned().collect();

        let meta_oid = store.write_blob(&cbor_encode(&meta)?).await?;
        let ids_oid = store.write_blob(&cbor_encode(&sorted_ids)?).await?;
        tree.insert(META_INFO_ENTRY.to_string(), meta_oid);
        tree.insert(META_IDS_ENTRY.to_string(), ids_oid);

        store.write_tree(&tree).await
    }
}

fn cbor_encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| WarpError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
