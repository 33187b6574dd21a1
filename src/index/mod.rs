//! The sharded bitmap index over the materialized logical graph topology.

pub mod builder;
pub mod reader;

pub use builder::WarpStateIndexBuilder;
pub use reader::BitmapIndexReader;

use serde::{Deserialize, Serialize};

/// Current on-disk codec version; bumped whenever the shard layout changes
/// in an incompatible way.
pub const CODEC_VERSION: u32 = 1;

pub(crate) const META_INFO_ENTRY: &str = "meta_info";
pub(crate) const META_IDS_ENTRY: &str = "meta_ids";

pub(crate) fn fwd_shard_entry(shard: u32) -> String {
    format!("shards_fwd_{shard}")
}

pub(crate) fn rev_shard_entry(shard: u32) -> String {
    format!("shards_rev_{shard}")
}

/// Index-level metadata, stored at `meta_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub n: u32,
    pub shard_count: u32,
    pub codec_version: u32,
    pub fwd_checksums: Vec<String>,
    pub rev_checksums: Vec<String>,
}

impl IndexMeta {
    pub(crate) fn shard_of(&self, id: u32) -> u32 {
        let shard_size = self.shard_size();
        id / shard_size
    }

    pub(crate) fn shard_size(&self) -> u32 {
        (self.n + self.shard_count.saturating_sub(1)) / self.shard_count.max(1)
    }

    pub(crate) fn shard_range(&self, shard: u32) -> (u32, u32) {
        let size = self.shard_size();
        let start = shard * size;
        (start, (start + size).min(self.n))
    }
}
