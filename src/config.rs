//! Engine-wide tunables.
//!
//! Mirrors the teacher's preset-constructor pattern: a plain [`Default`]
//! plus named constructors for common deployment shapes.

use std::time::Duration;

/// Policy controlling when [`crate::materialize::MaterializationService`]
/// creates a checkpoint on the caller's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoCheckpointPolicy {
    /// Never checkpoint automatically.
    Off,
    /// Checkpoint after this many patches have been folded since the last
    /// checkpoint.
    EveryNPatches(u64),
    /// Checkpoint after this much wall-clock time has elapsed since the
    /// last checkpoint. Stored in milliseconds to keep the type `Copy`.
    EveryMillis(u64),
}

/// Whether `getNodeProps`/`getEdges`/etc. require the cached state's
/// observed frontier to dominate the ref frontier before answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalenessPolicy {
    /// Serve whatever is cached, even if a ref has advanced since.
    Lenient,
    /// Raise [`crate::error::WarpError::StaleState`] if the cache is behind.
    Strict,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Entries retained in the `(frontierHash, ceiling) -> WarpState` cache.
    pub materialize_cache_size: usize,
    /// Entries retained in the `stateHash -> (forward, reverse)` adjacency
    /// cache.
    pub adjacency_cache_size: usize,
    /// Whether the join reducer emits per-op receipts (bypasses the
    /// materialize cache when true).
    pub receipts_enabled: bool,
    /// Checkpoint creation policy.
    pub auto_checkpoint: AutoCheckpointPolicy,
    /// Cache-staleness strictness for query methods.
    pub staleness: StalenessPolicy,
    /// Default traversal depth cap.
    pub default_max_depth: u32,
    /// Maximum internal retry attempts for transient object-store I/O.
    pub io_retry_attempts: u32,
    /// Per-attempt timeout for HTTP sync transport.
    pub sync_timeout: Duration,
    /// Maximum serialized sync request/response size accepted, in bytes.
    pub sync_request_size_limit: usize,
    /// Minimum allowed polling interval for `watch(...)`.
    pub min_watch_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            materialize_cache_size: 128,
            adjacency_cache_size: 128,
            receipts_enabled: false,
            auto_checkpoint: AutoCheckpointPolicy::Off,
            staleness: StalenessPolicy::Lenient,
            default_max_depth: 1000,
            io_retry_attempts: 3,
            sync_timeout: Duration::from_secs(30),
            sync_request_size_limit: 10 * 1024 * 1024,
            min_watch_interval: Duration::from_millis(1000),
        }
    }
}

impl EngineConfig {
    /// A single-node or test configuration: small caches, strict staleness
    /// checking, receipts on for observability.
    pub fn development() -> Self {
        Self {
            materialize_cache_size: 16,
            adjacency_cache_size: 16,
            receipts_enabled: true,
            auto_checkpoint: AutoCheckpointPolicy::Off,
            staleness: StalenessPolicy::Strict,
            ..Self::default()
        }
    }

    /// A long-running service configuration: larger caches, periodic
    /// checkpointing, lenient staleness for read throughput.
    pub fn production() -> Self {
        Self {
            materialize_cache_size: 512,
            adjacency_cache_size: 512,
            receipts_enabled: false,
            auto_checkpoint: AutoCheckpointPolicy::EveryNPatches(500),
            staleness: StalenessPolicy::Lenient,
            ..Self::default()
        }
    }

    /// A configuration tuned for throughput benchmarks: largest caches, no
    /// receipts, no auto-checkpoint so history stays linear for profiling.
    pub fn benchmark() -> Self {
        Self {
            materialize_cache_size: 2048,
            adjacency_cache_size: 2048,
            receipts_enabled: false,
            auto_checkpoint: AutoCheckpointPolicy::Off,
            staleness: StalenessPolicy::Lenient,
            io_retry_attempts: 0,
            ..Self::default()
        }
    }
}
