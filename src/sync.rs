//! Frontier-based anti-entropy sync: exchange per-writer tips with a peer,
//! validate incoming patches against the local chain, and advance local
//! writer refs.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{Result, WarpError};
use crate::ident;
use crate::materialize::WriterTips;
use crate::objectstore::{CasOutcome, ObjectStore};
use crate::patch::PatchTrailer;

/// `{type:"sync-request", frontier}`. `frontier` maps writer id to its tip
/// commit sha, serialized with sorted (BTreeMap) keys for canonical JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub frontier: WriterTips,
}

impl SyncRequest {
    pub fn new(frontier: WriterTips) -> Self {
        Self {
            kind: "sync-request".to_string(),
            frontier,
        }
    }
}

/// One patch carried over the wire: the writer it belongs to, the commit
/// sha it was read from, and the encoded patch blob bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPatch {
    pub writer_id: String,
    pub sha: String,
    pub patch_bytes: Vec<u8>,
}

/// `{type:"sync-response", frontier, patches}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub frontier: WriterTips,
    pub patches: Vec<SyncPatch>,
}

/// A peer capable of answering a sync request, either in-process or over a
/// network transport.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn process_sync_request(&self, request: SyncRequest) -> Result<SyncResponse>;
}

/// An in-process peer backed directly by a shared [`ObjectStore`]: walks
/// each locally-known writer's chain down to the caller's reported tip and
/// returns everything newer.
pub struct LocalPeer<'a> {
    store: &'a dyn ObjectStore,
    graph: String,
}

impl<'a> LocalPeer<'a> {
    pub fn new(store: &'a dyn ObjectStore, graph: impl Into<String>) -> Self {
        Self { store, graph: graph.into() }
    }
}

#[async_trait]
impl<'a> SyncTransport for LocalPeer<'a> {
    async fn process_sync_request(&self, request: SyncRequest) -> Result<SyncResponse> {
        let writer_refs = self.store.list_refs(&ident::refs::writers_prefix(&self.graph)).await?;
        let mut frontier = WriterTips::new();
        let mut patches = Vec::new();

        for r in writer_refs {
            let Some(writer) = r.rsplit('/').next() else { continue };
            let Some(tip) = self.store.read_ref(&r).await? else { continue };
            frontier.insert(writer.to_string(), tip.clone());

            let caller_tip = request.frontier.get(writer);
            let mut sha = Some(tip);
            while let Some(current) = sha {
                if Some(&current) == caller_tip {
                    break;
                }
                let info = self.store.get_node_info(&current).await?;
                let trailer = PatchTrailer::parse(&info.message)?;
                let bytes = self.store.read_blob(&trailer.patch_oid).await?;
                patches.push(SyncPatch {
                    writer_id: writer.to_string(),
                    sha: current.clone(),
                    patch_bytes: bytes,
                });
                sha = info.parents.first().cloned();
            }
        }

        Ok(SyncResponse {
            kind: "sync-response".to_string(),
            frontier,
            patches,
        })
    }
}

/// HTTP transport: POSTs a canonical-JSON [`SyncRequest`] to `endpoint` and
/// retries 5xx/network errors with decorrelated-jitter backoff.
#[cfg(feature = "http-sync")]
pub struct HttpSyncTransport {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    max_attempts: u32,
}

#[cfg(feature = "http-sync")]
impl HttpSyncTransport {
    pub fn new(endpoint: impl Into<String>, config: &EngineConfig) -> Result<Self> {
        let endpoint = endpoint.into();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(WarpError::SyncRemoteUrl(endpoint));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            timeout: config.sync_timeout,
            max_attempts: config.io_retry_attempts.max(1),
        })
    }
}

#[cfg(feature = "http-sync")]
#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn process_sync_request(&self, request: SyncRequest) -> Result<SyncResponse> {
        let mut last_err = None;
        let mut prior_sleep = Duration::from_millis(50);

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let sleep_for = decorrelated_jitter(prior_sleep);
                prior_sleep = sleep_for;
                tokio::time::sleep(sleep_for).await;
            }

            let sent = self
                .client
                .post(&self.endpoint)
                .timeout(self.timeout)
                .json(&request)
                .send()
                .await;

            match sent {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() {
                        let body = response.text().await.unwrap_or_default();
                        last_err = Some(WarpError::SyncHttp { status: status.as_u16(), body });
                        continue;
                    }
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(WarpError::SyncHttp { status: status.as_u16(), body });
                    }
                    return response.json::<SyncResponse>().await.map_err(|e| WarpError::ObjectStore(e.to_string()));
                }
                Err(e) if e.is_timeout() => {
                    last_err = Some(WarpError::SyncTimeout(self.timeout));
                }
                Err(e) => {
                    last_err = Some(WarpError::ObjectStore(e.to_string()));
                }
            }
        }

        Err(last_err.unwrap_or(WarpError::SyncTimeout(self.timeout)))
    }
}

/// AWS-style decorrelated jitter: `random(base, prior * 3)`, floored at
/// `base`, used between retry attempts.
fn decorrelated_jitter(prior: Duration) -> Duration {
    let base_ms = 50u64;
    let ceiling_ms = (prior.as_millis() as u64).saturating_mul(3).max(base_ms);
    let jittered = rand::thread_rng().gen_range(base_ms..=ceiling_ms);
    Duration::from_millis(jittered)
}

/// How an incoming writer's patch chain relates to what the receiver
/// already has for that writer, per the backfill/fork validation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainRelation {
    /// No local tip yet for this writer; accept unconditionally.
    Unrelated,
    /// The incoming tip strictly extends the local tip.
    Ahead,
    /// The incoming tip equals the local tip; nothing new to apply.
    Same,
    /// The incoming tip is a strict ancestor of the local tip.
    Behind,
    /// Neither side is an ancestor of the other.
    Diverged,
}

async fn classify(store: &dyn ObjectStore, local_tip: Option<&str>, incoming_tip: &str) -> Result<ChainRelation> {
    let Some(local_tip) = local_tip else {
        return Ok(ChainRelation::Unrelated);
    };
    if local_tip == incoming_tip {
        return Ok(ChainRelation::Same);
    }
    if store.is_ancestor(local_tip, incoming_tip).await? {
        return Ok(ChainRelation::Ahead);
    }
    if store.is_ancestor(incoming_tip, local_tip).await? {
        return Ok(ChainRelation::Behind);
    }
    Ok(ChainRelation::Diverged)
}

/// Per-writer outcome of applying a sync response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub advanced_writers: Vec<String>,
    pub new_tips: WriterTips,
}

/// Runs one sync round: requests `transport`'s view of `graph` starting from
/// `local_frontier`, validates every writer's incoming tip against the
/// locally known tip, and advances local writer refs for writers that are
/// strictly ahead. A writer whose incoming tip is behind or equal to the
/// local tip fails as [`WarpError::BackfillRejected`]; a diverged writer
/// fails as [`WarpError::WriterForkDetected`].
pub async fn sync(
    store: &dyn ObjectStore,
    graph: &str,
    transport: &dyn SyncTransport,
    local_frontier: &WriterTips,
) -> Result<SyncOutcome> {
    let response = transport.process_sync_request(SyncRequest::new(local_frontier.clone())).await?;

    let mut by_writer: BTreeMap<&str, Vec<&SyncPatch>> = BTreeMap::new();
    for patch in &response.patches {
        by_writer.entry(&patch.writer_id).or_default().push(patch);
    }

    let mut outcome = SyncOutcome {
        advanced_writers: Vec::new(),
        new_tips: WriterTips::new(),
    };

    for (writer, incoming_tip) in &response.frontier {
        let local_tip = local_frontier.get(writer).cloned();
        let relation = classify(store, local_tip.as_deref(), incoming_tip).await?;

        match relation {
            ChainRelation::Same => continue,
            ChainRelation::Behind => {
                return Err(WarpError::BackfillRejected { writer: writer.clone() });
            }
            ChainRelation::Diverged => {
                return Err(WarpError::WriterForkDetected { writer: writer.clone() });
            }
            ChainRelation::Unrelated | ChainRelation::Ahead => {}
        }

        if let Some(patches) = by_writer.get(writer.as_str()) {
            for patch in patches {
                store.write_blob(&patch.patch_bytes).await?;
            }
        }

        let ref_name = ident::refs::writer_tip(graph, writer);
        match store.compare_and_swap_ref(&ref_name, local_tip.as_ref(), incoming_tip).await? {
            CasOutcome::Applied => {
                outcome.advanced_writers.push(writer.clone());
                outcome.new_tips.insert(writer.clone(), incoming_tip.clone());
            }
            CasOutcome::Conflict { actual } => {
                return Err(WarpError::WriterForkDetected {
                    writer: format!("{writer} (local ref moved to {actual:?} during sync)"),
                });
            }
        }
    }

    Ok(outcome)
}
