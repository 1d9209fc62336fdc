//! The `StorageBackend` port (§6 of the spec) plus two adapters and the
//! `blockConcurrencyWhile` mutual-exclusion primitive every writer in
//! `waypoint-runtime`/`waypoint-budget` wraps its critical section in.
//!
//! A per-key KV shape rather than one giant snapshot file, since callers
//! here address individual entities by key (`run:{runId}`,
//! `task:{runId}:{taskId}`, ...) rather than one session blob.

mod gate;
mod json_file;
mod memory;

pub use gate::ConcurrencyGate;
pub use json_file::JsonFileStorage;
pub use memory::InMemoryStorage;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("backend reports {actual:?} semantics but {required:?} was required")]
    SemanticsMismatch {
        required: StorageSemantics,
        actual: StorageSemantics,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Tags what consistency guarantee a backend actually provides, so code
/// that requires strict durable-object semantics (single consistent
/// read-modify-write view per key, survives process restart) can refuse an
/// eventually-consistent KV backend instead of silently running on weaker
/// guarantees. Corresponds to the spec's `{do, kv, unknown}` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageSemantics {
    /// Durable-object-like: reads observe the effect of every completed
    /// write immediately, writes survive a process restart.
    Strict,
    /// Backed by an eventually-consistent KV store; a `blockConcurrencyWhile`
    /// critical section is only as strong as the backend's own consistency
    /// model.
    Kv,
    /// No durability claim at all (e.g. a pure in-memory test double).
    Unknown,
}

/// Key-value storage port. `waypoint-runtime` and `waypoint-budget` depend
/// only on this trait, never on a concrete backend.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;
    async fn put(&self, key: &str, value: Value) -> StorageResult<()>;
    async fn delete(&self, key: &str) -> StorageResult<()>;
    /// Returns every key with the given prefix, in no particular order.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;
    fn semantics(&self) -> StorageSemantics;
}

/// Refuses backends weaker than `required`. Callers that need a strict
/// durable view (e.g. the cost ledger's idempotency check) call this before
/// trusting the backend with a critical invariant.
pub fn assert_runtime_state_semantics(
    backend: &dyn StorageBackend,
    required: StorageSemantics,
) -> StorageResult<()> {
    let actual = backend.semantics();
    let satisfied = match required {
        StorageSemantics::Strict => actual == StorageSemantics::Strict,
        StorageSemantics::Kv => matches!(actual, StorageSemantics::Strict | StorageSemantics::Kv),
        StorageSemantics::Unknown => true,
    };
    if satisfied {
        Ok(())
    } else {
        Err(StorageError::SemanticsMismatch { required, actual })
    }
}
