use std::sync::Arc;

use waypoint_storage::{assert_runtime_state_semantics, ConcurrencyGate, StorageBackend, StorageSemantics};
use waypoint_types::{RunId, SessionId};

use crate::policy::MemoryError;
use crate::types::MemoryEvent;

/// Writes run-scoped `MemoryEvent`s under `run:{runId}:memory:event:{eventId}`.
/// Independent of `SessionMemoryStore`: a run's memory is not visible to
/// other runs, even within the same session.
pub struct MemoryRepository {
    storage: Arc<dyn StorageBackend>,
    gate: ConcurrencyGate,
}

impl MemoryRepository {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Result<Self, MemoryError> {
        assert_runtime_state_semantics(storage.as_ref(), StorageSemantics::Kv)?;
        Ok(Self {
            storage,
            gate: ConcurrencyGate::new(),
        })
    }

    fn event_key(run_id: &RunId, event_id: &str) -> String {
        format!("run:{run_id}:memory:event:{event_id}")
    }

    fn idempotency_key(run_id: &RunId, idempotency_key: &str) -> String {
        format!("run:{run_id}:memory:idempotency:{idempotency_key}")
    }

    pub async fn append(&self, event: MemoryEvent) -> Result<bool, MemoryError> {
        let run_id = event.run_id.clone();
        self.gate
            .block_concurrency_while(run_id.as_str(), || async move {
                let idem_key = Self::idempotency_key(&event.run_id, &event.idempotency_key);
                if self.storage.get(&idem_key).await?.is_some() {
                    return Ok(false);
                }
                let event_key = Self::event_key(&event.run_id, &event.event_id);
                self.storage.put(&event_key, serde_json::to_value(&event)?).await?;
                self.storage
                    .put(&idem_key, serde_json::Value::String(event.event_id.clone()))
                    .await?;
                Ok(true)
            })
            .await
    }

    pub async fn get_events(&self, run_id: &RunId) -> Result<Vec<MemoryEvent>, MemoryError> {
        let prefix = format!("run:{run_id}:memory:event:");
        let keys = self.storage.list(&prefix).await?;
        let mut events = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.storage.get(&key).await? {
                events.push(serde_json::from_value::<MemoryEvent>(value)?);
            }
        }
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }

    /// Deletes one event's key; leaves its idempotency marker in place so a
    /// replayed extraction still dedupes against the now-compacted original.
    pub async fn delete_event(&self, run_id: &RunId, event_id: &str) -> Result<(), MemoryError> {
        self.storage.delete(&Self::event_key(run_id, event_id)).await?;
        Ok(())
    }
}

/// Writes session-scoped `MemoryEvent`s under
/// `session:{sessionId}:memory:event:{eventId}`, independent storage shared
/// across every run within the session.
pub struct SessionMemoryStore {
    storage: Arc<dyn StorageBackend>,
    gate: ConcurrencyGate,
}

impl SessionMemoryStore {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Result<Self, MemoryError> {
        assert_runtime_state_semantics(storage.as_ref(), StorageSemantics::Kv)?;
        Ok(Self {
            storage,
            gate: ConcurrencyGate::new(),
        })
    }

    fn event_key(session_id: &SessionId, event_id: &str) -> String {
        format!("session:{session_id}:memory:event:{event_id}")
    }

    fn idempotency_key(session_id: &SessionId, idempotency_key: &str) -> String {
        format!("session:{session_id}:memory:idempotency:{idempotency_key}")
    }

    pub async fn append(&self, event: MemoryEvent) -> Result<bool, MemoryError> {
        let session_id = event.session_id.clone();
        self.gate
            .block_concurrency_while(session_id.as_str(), || async move {
                let idem_key = Self::idempotency_key(&event.session_id, &event.idempotency_key);
                if self.storage.get(&idem_key).await?.is_some() {
                    return Ok(false);
                }
                let event_key = Self::event_key(&event.session_id, &event.event_id);
                self.storage.put(&event_key, serde_json::to_value(&event)?).await?;
                self.storage
                    .put(&idem_key, serde_json::Value::String(event.event_id.clone()))
                    .await?;
                Ok(true)
            })
            .await
    }

    pub async fn get_events(&self, session_id: &SessionId) -> Result<Vec<MemoryEvent>, MemoryError> {
        let prefix = format!("session:{session_id}:memory:event:");
        let keys = self.storage.list(&prefix).await?;
        let mut events = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.storage.get(&key).await? {
                events.push(serde_json::from_value::<MemoryEvent>(value)?);
            }
        }
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }

    pub async fn delete_event(&self, session_id: &SessionId, event_id: &str) -> Result<(), MemoryError> {
        self.storage
            .delete(&Self::event_key(session_id, event_id))
            .await?;
        Ok(())
    }
}
