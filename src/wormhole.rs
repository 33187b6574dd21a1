//! Compresses a contiguous run of one writer's patches into a single
//! provenance payload that still replays exactly, and composes adjacent
//! payloads back together.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WarpError};
use crate::ident;
use crate::objectstore::{ObjectStore, Oid};
use crate::patch::{DecodedPatch, Patch, PatchTrailer};

/// The endpoints of a range to compress, all within one writer's chain.
pub struct WormholeRange {
    pub writer: String,
    pub from_sha: Oid,
    pub to_sha: Oid,
}

/// A compressed provenance payload: every patch between `from_sha` and
/// `to_sha` (inclusive), oldest first, so replaying them in order against
/// the state at `from_sha`'s parent reproduces the state at `to_sha`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WormholePayload {
    pub writer: String,
    pub from_sha: Oid,
    pub to_sha: Oid,
    pub patches: Vec<DecodedPatch>,
}

impl WormholePayload {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| WarpError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| WarpError::Serialization(e.to_string()))
    }
}

/// Compresses `range` into a [`WormholePayload`], validating that both
/// endpoints exist, `from_sha` is an ancestor of (or equal to) `to_sha`
/// within `range.writer`'s chain, and every commit in between is a patch
/// commit for that same writer.
pub async fn compress(store: &dyn ObjectStore, range: WormholeRange) -> Result<WormholePayload> {
    ident::validate_oid(&range.from_sha)?;
    ident::validate_oid(&range.to_sha)?;

    if !store.node_exists(&range.from_sha).await? {
        return Err(WarpError::WormholeShaNotFound(range.from_sha.clone()));
    }
    if !store.node_exists(&range.to_sha).await? {
        return Err(WarpError::WormholeShaNotFound(range.to_sha.clone()));
    }
    if !store.is_ancestor(&range.from_sha, &range.to_sha).await? {
        return Err(WarpError::WormholeInvalidRange(format!(
            "{} is not an ancestor of {}",
            range.from_sha, range.to_sha
        )));
    }

    let mut collected = Vec::new();
    let mut sha = Some(range.to_sha.clone());
    let mut reached_from = false;

    while let Some(current) = sha {
        let info = store.get_node_info(&current).await?;
        let trailer = PatchTrailer::parse(&info.message).map_err(|_| WarpError::WormholeNotPatch(current.clone()))?;
        if trailer.writer != range.writer {
            return Err(WarpError::WormholeMultiWriter);
        }
        let bytes = store.read_blob(&trailer.patch_oid).await?;
        let patch = Patch::decode(&bytes)?;
        collected.push(DecodedPatch { sha: current.clone(), patch });

        if current == range.from_sha {
            reached_from = true;
            break;
        }
        sha = info.parents.first().cloned();
    }

    if !reached_from {
        return Err(WarpError::WormholeInvalidRange(format!(
            "{} not reached while walking back from {}",
            range.from_sha, range.to_sha
        )));
    }

    collected.reverse();
    Ok(WormholePayload {
        writer: range.writer,
        from_sha: range.from_sha,
        to_sha: range.to_sha,
        patches: collected,
    })
}

/// Composes two adjacent wormholes (`a` immediately followed by `b`) into
/// one spanning payload. The monoid operation: same writer, `a.to_sha ==
/// b.from_sha`, patches concatenate in order.
pub fn compose(a: &WormholePayload, b: &WormholePayload) -> Result<WormholePayload> {
    if a.writer != b.writer {
        return Err(WarpError::WormholeMultiWriter);
    }
    if a.to_sha != b.from_sha {
        return Err(WarpError::WormholeInvalidRange(format!(
            "{} does not immediately precede {}",
            a.to_sha, b.from_sha
        )));
    }
    let mut patches = a.patches.clone();
    patches.extend(b.patches.iter().cloned());
    Ok(WormholePayload {
        writer: a.writer.clone(),
        from_sha: a.from_sha.clone(),
        to_sha: b.to_sha.clone(),
        patches,
    })
}
