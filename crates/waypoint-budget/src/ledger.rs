use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use waypoint_storage::{assert_runtime_state_semantics, ConcurrencyGate, StorageBackend, StorageSemantics};
use waypoint_types::{Phase, PricingSource, RunId, SessionId, TaskId};

use crate::LedgerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEvent {
    pub event_id: String,
    pub idempotency_key: String,
    pub run_id: RunId,
    pub session_id: SessionId,
    pub task_id: Option<TaskId>,
    pub agent_type: String,
    pub phase: Phase,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub provider_cost_usd: Option<f64>,
    pub calculated_cost_usd: f64,
    pub pricing_source: PricingSource,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CostAggregate {
    pub total_cost: f64,
    pub total_tokens: u64,
    pub event_count: u64,
    pub by_model: HashMap<String, f64>,
    pub by_provider: HashMap<String, f64>,
}

/// Append-only, idempotent cost ledger. Every write for a given `runId`
/// runs inside that run's `ConcurrencyGate` shard so a duplicate
/// `idempotencyKey` check-then-insert can never race with itself.
pub struct CostLedger {
    storage: Arc<dyn StorageBackend>,
    gate: ConcurrencyGate,
}

impl CostLedger {
    /// Refuses a backend weaker than `Kv` — the idempotency check below
    /// needs at least eventually-consistent durability to be meaningful.
    pub fn new(storage: Arc<dyn StorageBackend>) -> Result<Self, LedgerError> {
        assert_runtime_state_semantics(storage.as_ref(), StorageSemantics::Kv)?;
        Ok(Self {
            storage,
            gate: ConcurrencyGate::new(),
        })
    }

    fn event_key(run_id: &RunId, event_id: &str) -> String {
        format!("cost:event:{run_id}:{event_id}")
    }

    fn idempotency_key(run_id: &RunId, idempotency_key: &str) -> String {
        format!("cost:idempotency:{run_id}:{idempotency_key}")
    }

    /// Returns `true` if the event was newly appended, `false` if a prior
    /// event with the same `(runId, idempotencyKey)` already existed (the
    /// call does not mutate storage in that case).
    pub async fn append(&self, event: CostEvent) -> Result<bool, LedgerError> {
        let run_id = event.run_id.clone();
        self.gate
            .block_concurrency_while(run_id.as_str(), || async move {
                let idem_key = Self::idempotency_key(&event.run_id, &event.idempotency_key);
                if self.storage.get(&idem_key).await?.is_some() {
                    tracing::debug!(
                        run_id = %event.run_id,
                        idempotency_key = %event.idempotency_key,
                        "duplicate cost event dropped"
                    );
                    return Ok(false);
                }

                let event_key = Self::event_key(&event.run_id, &event.event_id);
                let value = serde_json::to_value(&event)?;
                self.storage.put(&event_key, value).await?;
                self.storage
                    .put(&idem_key, serde_json::Value::String(event.event_id.clone()))
                    .await?;
                Ok(true)
            })
            .await
    }

    pub async fn get_events(&self, run_id: &RunId) -> Result<Vec<CostEvent>, LedgerError> {
        let prefix = format!("cost:event:{run_id}:");
        let keys = self.storage.list(&prefix).await?;
        let mut events = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.storage.get(&key).await? {
                events.push(serde_json::from_value::<CostEvent>(value)?);
            }
        }
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }

    pub async fn aggregate(&self, run_id: &RunId) -> Result<CostAggregate, LedgerError> {
        let events = self.get_events(run_id).await?;
        let mut aggregate = CostAggregate::default();
        for event in &events {
            aggregate.total_cost += event.calculated_cost_usd;
            aggregate.total_tokens += event.total_tokens;
            aggregate.event_count += 1;
            *aggregate.by_model.entry(event.model.clone()).or_insert(0.0) +=
                event.calculated_cost_usd;
            *aggregate
                .by_provider
                .entry(event.provider.clone())
                .or_insert(0.0) += event.calculated_cost_usd;
        }
        Ok(aggregate)
    }

    /// Read-only derived view breaking cost down by `CostEvent.phase`
    /// (planning/task/synthesis/memory), since `RunEngine` routinely wants
    /// per-phase cost for budget alerts. Adds no new invariant over
    /// `aggregate`.
    pub async fn aggregate_by_phase(
        &self,
        run_id: &RunId,
    ) -> Result<HashMap<Phase, f64>, LedgerError> {
        let events = self.get_events(run_id).await?;
        let mut by_phase: HashMap<Phase, f64> = HashMap::new();
        for event in &events {
            *by_phase.entry(event.phase).or_insert(0.0) += event.calculated_cost_usd;
        }
        Ok(by_phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_storage::InMemoryStorage;

    fn sample_event(run_id: &RunId, idempotency_key: &str, cost: f64) -> CostEvent {
        CostEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            idempotency_key: idempotency_key.to_string(),
            run_id: run_id.clone(),
            session_id: SessionId::from("session-1"),
            task_id: None,
            agent_type: "coding".to_string(),
            phase: Phase::Task,
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 150,
            provider_cost_usd: None,
            calculated_cost_usd: cost,
            pricing_source: PricingSource::Registry,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_dropped() {
        let ledger = CostLedger::new(Arc::new(InMemoryStorage::new())).unwrap();
        let run_id = RunId::from("run-1");

        let first = sample_event(&run_id, "k", 0.12);
        let mut second = sample_event(&run_id, "k", 0.99);
        second.event_id = first.event_id.clone();

        assert!(ledger.append(first).await.unwrap());
        assert!(!ledger.append(second).await.unwrap());

        let events = ledger.get_events(&run_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].calculated_cost_usd, 0.12);

        let aggregate = ledger.aggregate(&run_id).await.unwrap();
        assert_eq!(aggregate.total_cost, 0.12);
        assert_eq!(aggregate.event_count, 1);
    }

    #[tokio::test]
    async fn aggregate_by_phase_breaks_down_cost() {
        let ledger = CostLedger::new(Arc::new(InMemoryStorage::new())).unwrap();
        let run_id = RunId::from("run-1");

        let mut planning = sample_event(&run_id, "plan-1", 0.10);
        planning.phase = Phase::Planning;
        let mut task = sample_event(&run_id, "task-1", 0.20);
        task.phase = Phase::Task;

        ledger.append(planning).await.unwrap();
        ledger.append(task).await.unwrap();

        let by_phase = ledger.aggregate_by_phase(&run_id).await.unwrap();
        assert_eq!(by_phase.get(&Phase::Planning).copied(), Some(0.10));
        assert_eq!(by_phase.get(&Phase::Task).copied(), Some(0.20));
    }
}
