use std::sync::Arc;

use waypoint_storage::{ConcurrencyGate, StorageBackend};
use waypoint_types::{RunId, SessionId};

use crate::{BudgetBucket, BudgetError, CostLedger};

#[derive(Debug, Clone, Copy)]
pub struct PreflightReport {
    pub projected_run_cost: f64,
    pub projected_session_cost: f64,
    /// `true` when projected cost crosses `warning_threshold` of either
    /// limit. Soft signal only — callers log it, they don't block on it.
    pub warning: bool,
}

/// Enforces per-run and per-session USD ceilings. Run cost is always read
/// fresh from the `CostLedger` (the source of truth); session cost is
/// tracked in a running total this policy owns, since no single run's
/// ledger spans a whole session.
pub struct BudgetPolicy {
    ledger: Arc<CostLedger>,
    storage: Arc<dyn StorageBackend>,
    gate: ConcurrencyGate,
    max_cost_per_run: f64,
    max_cost_per_session: f64,
    warning_threshold: f64,
}

impl BudgetPolicy {
    pub fn new(
        ledger: Arc<CostLedger>,
        storage: Arc<dyn StorageBackend>,
        max_cost_per_run: f64,
        max_cost_per_session: f64,
        warning_threshold: f64,
    ) -> Self {
        Self {
            ledger,
            storage,
            gate: ConcurrencyGate::new(),
            max_cost_per_run,
            max_cost_per_session,
            warning_threshold,
        }
    }

    fn session_cost_key(session_id: &SessionId) -> String {
        format!("budget:session_cost:{session_id}")
    }

    async fn current_session_cost(&self, session_id: &SessionId) -> Result<f64, BudgetError> {
        let key = Self::session_cost_key(session_id);
        let value = self
            .storage
            .get(&key)
            .await
            .map_err(|e| BudgetError::Ledger(e.into()))?;
        Ok(value.and_then(|v| v.as_f64()).unwrap_or(0.0))
    }

    /// Estimates whether `planned_cost_usd` would push the run or the
    /// session over its limit. A limit of `0.0` means unlimited. Fails
    /// closed with `BudgetExceeded` and makes no ledger append — the
    /// caller must not invoke the underlying provider in that case.
    pub async fn preflight(
        &self,
        run_id: &RunId,
        session_id: &SessionId,
        planned_cost_usd: f64,
    ) -> Result<PreflightReport, BudgetError> {
        let current_run_cost = self.ledger.aggregate(run_id).await?.total_cost;
        let current_session_cost = self.current_session_cost(session_id).await?;

        let projected_run_cost = current_run_cost + planned_cost_usd;
        let projected_session_cost = current_session_cost + planned_cost_usd;

        if self.max_cost_per_run > 0.0 && projected_run_cost > self.max_cost_per_run {
            return Err(BudgetError::BudgetExceeded {
                bucket: BudgetBucket::Run,
                limit: self.max_cost_per_run,
                actual: projected_run_cost,
            });
        }
        if self.max_cost_per_session > 0.0 && projected_session_cost > self.max_cost_per_session {
            return Err(BudgetError::BudgetExceeded {
                bucket: BudgetBucket::Session,
                limit: self.max_cost_per_session,
                actual: projected_session_cost,
            });
        }

        let warning = (self.max_cost_per_run > 0.0
            && projected_run_cost >= self.max_cost_per_run * self.warning_threshold)
            || (self.max_cost_per_session > 0.0
                && projected_session_cost >= self.max_cost_per_session * self.warning_threshold);

        Ok(PreflightReport {
            projected_run_cost,
            projected_session_cost,
            warning,
        })
    }

    /// Records the realized cost of a completed call against the session's
    /// running total. The run-scoped total needs no separate bookkeeping
    /// here: it is derived from the ledger the caller already appended to.
    pub async fn post_commit(
        &self,
        session_id: &SessionId,
        actual_cost_usd: f64,
    ) -> Result<(), BudgetError> {
        let key = Self::session_cost_key(session_id);
        self.gate
            .block_concurrency_while(session_id.as_str(), || async {
                let current = self.current_session_cost(session_id).await?;
                self.storage
                    .put(&key, serde_json::json!(current + actual_cost_usd))
                    .await
                    .map_err(|e| BudgetError::Ledger(e.into()))
            })
            .await
    }
}
