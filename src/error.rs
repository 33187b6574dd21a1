use thiserror::Error;

use crate::model::clock::EventId;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, WarpError>;

/// The full error taxonomy for the engine.
///
/// Variants are grouped to mirror the subsystems that raise them: validation
/// happens at every public entry point, CRDT/patch errors come out of the
/// patch builder, materialization errors come out of the reducer and
/// checkpoint fast-start, index errors come out of the bitmap reader, and
/// sync/fork/wormhole errors come out of their respective services.
#[derive(Debug, Error)]
pub enum WarpError {
    // -- Validation --
    #[error("invalid graph name: {0}")]
    InvalidGraphName(String),
    #[error("invalid writer id: {0}")]
    InvalidWriterId(String),
    #[error("invalid oid: {0}")]
    InvalidOid(String),
    #[error("invalid ref: {0}")]
    InvalidRef(String),
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    #[error("invalid config key: {0}")]
    InvalidConfigKey(String),

    // -- CRDT / Patch --
    #[error("patch has no operations")]
    EmptyPatch,
    #[error("writer ref advanced: expected {expected}, actual {actual}")]
    WriterRefAdvanced { expected: String, actual: String },
    #[error("failed to persist write: {0}")]
    PersistWriteFailed(String),
    #[error("cached state is stale with respect to the writer frontier")]
    StaleState,
    #[error("no materialized state is cached")]
    NoState,

    // -- Materialization --
    #[error("backfill rejected for writer {writer}: incoming patch does not extend checkpoint head")]
    BackfillRejected { writer: String },
    #[error("writer fork detected for writer {writer}: incoming chain diverges from checkpoint head")]
    WriterForkDetected { writer: String },
    #[error("malformed patch {sha}: {reason}")]
    MalformedPatch { sha: String, reason: String },
    #[error("checkpoint state hash mismatch: expected {expected}, computed {computed}")]
    StateHashMismatch { expected: String, computed: String },

    // -- Index --
    #[error("failed to load index shard {shard}: {source}")]
    ShardLoadError {
        shard: String,
        #[source]
        source: Box<WarpError>,
    },
    #[error("failed to decode index shard {shard}: {reason}")]
    ShardCorruptionError { shard: String, reason: String },
    #[error("index shard {shard} failed validation: {reason}")]
    ShardValidationError { shard: String, reason: String },

    // -- Sync --
    #[error("invalid sync remote url: {0}")]
    SyncRemoteUrl(String),
    #[error("sync request timed out after {0:?}")]
    SyncTimeout(std::time::Duration),
    #[error("sync transport returned HTTP {status}: {body}")]
    SyncHttp { status: u16, body: String },

    // -- Fork / Wormhole --
    #[error("fork source writer not found: {0}")]
    ForkWriterNotFound(String),
    #[error("fork anchor commit not found: {0}")]
    ForkPatchNotFound(String),
    #[error("fork anchor commit {0} is not in the writer's chain")]
    ForkPatchNotInChain(String),
    #[error("fork name invalid: {0}")]
    ForkNameInvalid(String),
    #[error("fork target already exists: {0}")]
    ForkAlreadyExists(String),
    #[error("wormhole endpoint sha not found: {0}")]
    WormholeShaNotFound(String),
    #[error("wormhole range invalid: {0}")]
    WormholeInvalidRange(String),
    #[error("wormhole range spans multiple writers")]
    WormholeMultiWriter,
    #[error("wormhole range includes a non-patch commit: {0}")]
    WormholeNotPatch(String),

    // -- Concurrency --
    #[error("operation aborted")]
    OperationAborted,

    // -- Object store transport --
    #[error("object store error: {0}")]
    ObjectStore(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl WarpError {
    /// True for errors the propagation policy in the spec's error-handling
    /// section treats as transient and worth an internal retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, WarpError::ObjectStore(_))
    }
}

/// A resolved winner recorded on a "superseded" receipt entry, per the
/// design note preferring a structured payload over a free-form string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupersededBy {
    pub winner: EventId,
}

impl std::fmt::Display for SupersededBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "superseded by {}", self.winner)
    }
}
