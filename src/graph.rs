//! [`WarpGraph`]: the facade binding materialization, patch commits, query,
//! subscriptions, sync, fork, and wormhole into one per-graph handle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::abort::AbortSignal;
use crate::checkpoint::{self, Checkpoint};
use crate::config::{AutoCheckpointPolicy, EngineConfig};
use crate::error::{Result, WarpError};
use crate::fork::{self, ForkOutcome, ForkRequest};
use crate::ident;
use crate::materialize::{MaterializationService, WriterTips};
use crate::model::value::PropertyValue;
use crate::objectstore::ObjectStore;
use crate::patchbuilder::{CommitOutcome, PatchBuilder};
use crate::query::subscribe::{SubscribeOptions, SubscriptionManager};
use crate::query::{GlobCache, QueryLayer};
use crate::sync::{self, SyncOutcome, SyncTransport};
use crate::wormhole::{self, WormholePayload, WormholeRange};

/// The per-graph handle. Materialize, commit, sync, and checkpoint are
/// mutually serialized by `queue` (§5): callers observe the effect of
/// their own last awaited call before any other queued operation begins.
pub struct WarpGraph {
    store: Arc<dyn ObjectStore>,
    graph: String,
    config: EngineConfig,
    materializer: MaterializationService,
    pub query: QueryLayer,
    pub subscriptions: SubscriptionManager,
    glob: GlobCache,
    queue: AsyncMutex<()>,
    last_tips: std::sync::Mutex<WriterTips>,
    patches_since_checkpoint: AtomicU64,
}

impl WarpGraph {
    pub fn new(store: Arc<dyn ObjectStore>, graph: impl Into<String>, config: EngineConfig) -> Result<Self> {
        let graph = graph.into();
        ident::validate_graph_name(&graph)?;
        Ok(Self {
            store,
            materializer: MaterializationService::new(config.materialize_cache_size, config.adjacency_cache_size),
            query: QueryLayer::new(config.staleness),
            subscriptions: SubscriptionManager::new(),
            glob: GlobCache::new(),
            queue: AsyncMutex::new(()),
            last_tips: std::sync::Mutex::new(WriterTips::new()),
            patches_since_checkpoint: AtomicU64::new(0),
            graph,
            config,
        })
    }

    pub fn graph_name(&self) -> &str {
        &self.graph
    }

    /// Reads every writer's current tip sha from the object store.
    pub async fn current_tips(&self) -> Result<WriterTips> {
        let refs = self.store.list_refs(&ident::refs::writers_prefix(&self.graph)).await?;
        let mut tips = WriterTips::new();
        for r in refs {
            let Some(writer) = r.rsplit('/').next() else { continue };
            if let Some(tip) = self.store.read_ref(&r).await? {
                tips.insert(writer.to_string(), tip);
            }
        }
        Ok(tips)
    }

    pub async fn has_frontier_changed(&self) -> Result<bool> {
        let current = self.current_tips().await?;
        Ok(*self.last_tips.lock().expect("last_tips mutex poisoned") != current)
    }

    /// Materializes current state and, if it differs from whatever was
    /// cached before, installs it and dispatches a [`crate::query::StateDiff`]
    /// to every subscription.
    pub async fn materialize(&self, abort: Option<&AbortSignal>) -> Result<()> {
        let _guard = self.queue.lock().await;
        self.materialize_locked(abort).await
    }

    async fn materialize_locked(&self, abort: Option<&AbortSignal>) -> Result<()> {
        if let Some(signal) = abort {
            signal.check()?;
        }
        let tips = self.current_tips().await?;
        let materialized = self
            .materializer
            .materialize(self.store.as_ref(), &self.graph, &tips, None, self.config.receipts_enabled, abort)
            .await?;

        let previous = self.query.peek();
        self.query.set_state(materialized.state.clone());
        *self.last_tips.lock().expect("last_tips mutex poisoned") = tips;

        let diff = match previous {
            Some(prev) => crate::query::diff_states(&prev, &materialized.state),
            None => crate::query::subscribe::full_state_as_diff(&materialized.state),
        };
        if !diff.is_empty() {
            self.subscriptions.dispatch(&self.glob, &diff);
        }

        self.maybe_auto_checkpoint().await
    }

    async fn maybe_auto_checkpoint(&self) -> Result<()> {
        match self.config.auto_checkpoint {
            AutoCheckpointPolicy::Off => Ok(()),
            AutoCheckpointPolicy::EveryNPatches(n) => {
                if self.patches_since_checkpoint.load(Ordering::Relaxed) >= n {
                    // auto-GC/checkpoint failures are logged and swallowed;
                    // materialize must still succeed (§7).
                    if let Err(e) = self.checkpoint_locked().await {
                        tracing::warn!(error = %e, "auto-checkpoint failed, continuing");
                    } else {
                        self.patches_since_checkpoint.store(0, Ordering::Relaxed);
                    }
                }
                Ok(())
            }
            AutoCheckpointPolicy::EveryMillis(_) => Ok(()),
        }
    }

    /// Builds and commits one patch for `writer`. `build` receives a
    /// [`PatchBuilder`] already seeded with the writer's current lamport,
    /// context, and expected ref head; the engine selects those, not the
    /// caller.
    pub async fn patch<F>(&self, writer: &str, build: F) -> Result<CommitOutcome>
    where
        F: FnOnce(&mut PatchBuilder),
    {
        ident::validate_writer_id(writer)?;
        let _guard = self.queue.lock().await;

        let tips = self.current_tips().await?;
        let materialized = self
            .materializer
            .materialize(self.store.as_ref(), &self.graph, &tips, None, false, None)
            .await?;

        let observed_counter = materialized.state.observed_frontier.get(writer);
        // lamport is the global clock (every writer bumps max_lamport on
        // integration, see `reduce::reduce`), not this writer's own dot
        // counter, which `observed_counter` above tracks separately.
        let lamport = materialized.state.max_lamport + 1;
        let expected_old_head = tips.get(writer).cloned();

        let mut builder = PatchBuilder::new(
            self.graph.clone(),
            writer,
            lamport,
            materialized.state.observed_frontier.clone(),
            expected_old_head,
            observed_counter,
        );
        build(&mut builder);
        let outcome = builder.commit(self.store.as_ref()).await?;

        self.materializer.invalidate();
        self.patches_since_checkpoint.fetch_add(1, Ordering::Relaxed);
        self.materialize_locked(None).await?;
        Ok(outcome)
    }

    /// Convenience: sets a single node property in its own patch.
    pub async fn set_node_prop(&self, writer: &str, node: &str, key: &str, value: impl Into<PropertyValue> + Send) -> Result<CommitOutcome> {
        let value = value.into();
        self.patch(writer, move |b| {
            b.set_node_prop(node, key, value);
        })
        .await
    }

    pub async fn sync(&self, transport: &dyn SyncTransport) -> Result<SyncOutcome> {
        let _guard = self.queue.lock().await;
        let tips = self.current_tips().await?;
        let outcome = sync::sync(self.store.as_ref(), &self.graph, transport, &tips).await?;
        self.materializer.invalidate();
        self.materialize_locked(None).await?;
        Ok(outcome)
    }

    pub async fn checkpoint(&self) -> Result<Checkpoint> {
        let _guard = self.queue.lock().await;
        self.checkpoint_locked().await
    }

    async fn checkpoint_locked(&self) -> Result<Checkpoint> {
        let tips = self.current_tips().await?;
        let materialized = self
            .materializer
            .materialize(self.store.as_ref(), &self.graph, &tips, None, false, None)
            .await?;
        let created = checkpoint::create_checkpoint(self.store.as_ref(), &self.graph, &materialized.state, &tips).await?;
        self.materializer.invalidate();
        Ok(created)
    }

    pub async fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        checkpoint::load_checkpoint(self.store.as_ref(), &self.graph).await
    }

    /// Forks `writer`'s history at `at` into a brand-new graph. Does not
    /// participate in the materialize/commit/sync/checkpoint queue since it
    /// only touches the target graph's refs.
    pub async fn fork(&self, writer: &str, at: &str, fork_graph: &str, fork_writer_id: Option<String>) -> Result<ForkOutcome> {
        fork::fork(
            self.store.as_ref(),
            ForkRequest {
                from_graph: self.graph.clone(),
                from_writer: writer.to_string(),
                at: at.to_string(),
                fork_graph: fork_graph.to_string(),
                fork_writer_id,
            },
        )
        .await
    }

    pub async fn wormhole_compress(&self, writer: &str, from_sha: &str, to_sha: &str) -> Result<WormholePayload> {
        wormhole::compress(
            self.store.as_ref(),
            WormholeRange {
                writer: writer.to_string(),
                from_sha: from_sha.to_string(),
                to_sha: to_sha.to_string(),
            },
        )
        .await
    }

    pub fn wormhole_compose(&self, a: &WormholePayload, b: &WormholePayload) -> Result<WormholePayload> {
        wormhole::compose(a, b)
    }

    pub fn subscribe(&self, opts: SubscribeOptions) -> u64 {
        let replay = opts.replay;
        let id = self.subscriptions.subscribe(opts);
        if replay {
            if let Some(state) = self.query.peek() {
                self.subscriptions.replay_to(&self.glob, id, &state);
            }
        }
        id
    }

    pub fn watch(&self, pattern: impl Into<String>, opts: SubscribeOptions) -> u64 {
        let pattern = pattern.into();
        let replay = opts.replay;
        let id = self.subscriptions.watch(pattern, opts);
        if replay {
            if let Some(state) = self.query.peek() {
                self.subscriptions.replay_to(&self.glob, id, &state);
            }
        }
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscriptions.unsubscribe(id);
    }

    /// One `watch(...)` polling tick: re-materializes only if the frontier
    /// moved since the last check. Callers should not invoke this faster
    /// than [`EngineConfig::min_watch_interval`].
    pub async fn poll_tick(&self) -> Result<bool> {
        if self.has_frontier_changed().await? {
            self.materialize(None).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub async fn discover_ticks(&self, tips: &BTreeMap<String, String>) -> Result<crate::materialize::DiscoverTicks> {
        self.materializer.discover_ticks(self.store.as_ref(), tips).await
    }
}
