use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use waypoint_events::{EventBus, EventEnvelope, EventSource};
use waypoint_memory::{MemoryContext, MemoryCoordinator, RetrieveContextRequest};
use waypoint_runtime::{NewTaskParams, RunInput, RunOutput, RuntimeError, StateManager, TaskInput};
use waypoint_scheduler::{RetryPolicy, SchedulerError, TaskScheduler};
use waypoint_types::{RunId, SessionId, TaskId};

use crate::agent::{Agent, AgentError, PlanContext, SynthesisContext, TaskExecutionContext};
use crate::agent_task_executor::AgentTaskExecutor;
use crate::stop_policy::{evaluate, ExecutionState, StopPolicyConfig, StopReason};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("run stopped before completing: {0:?}")]
    StoppedEarly(StopReason),
}

pub struct RunEngineInput {
    pub session_id: SessionId,
    pub agent_type: String,
    pub prompt: String,
    pub history: Vec<String>,
    pub model_id: Option<String>,
    pub provider_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

pub struct RunResult {
    pub run_id: RunId,
    pub output: String,
    pub execution_state: ExecutionState,
}

/// Composes planning, scheduling, and synthesis into one complete run under
/// a stop policy, per spec §4.12. Agnostic to the concrete `Agent`
/// implementation — it only drives the `Agent`/`TaskScheduler` ports.
pub struct RunEngine {
    state: Arc<StateManager>,
    agent: Arc<dyn Agent>,
    memory: Option<Arc<MemoryCoordinator>>,
    events: Option<Arc<EventBus>>,
    retry_policy: RetryPolicy,
    stop_policy: StopPolicyConfig,
    memory_token_budget: usize,
}

impl RunEngine {
    pub fn new(state: Arc<StateManager>, agent: Arc<dyn Agent>) -> Self {
        Self {
            state,
            agent,
            memory: None,
            events: None,
            retry_policy: RetryPolicy::default(),
            stop_policy: StopPolicyConfig::default(),
            memory_token_budget: 2000,
        }
    }

    pub fn with_memory(mut self, memory: Arc<MemoryCoordinator>, token_budget: usize) -> Self {
        self.memory = Some(memory);
        self.memory_token_budget = token_budget;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_stop_policy(mut self, stop_policy: StopPolicyConfig) -> Self {
        self.stop_policy = stop_policy;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    fn emit(&self, run_id: &RunId, event_type: &str, payload: serde_json::Value) {
        if let Some(bus) = &self.events {
            let envelope = EventEnvelope::new(run_id.clone(), None, EventSource::Brain, event_type, payload);
            bus.emit(&envelope);
        }
    }

    async fn context_bundle(&self, run_id: &RunId, session_id: &SessionId, prompt: &str) -> MemoryContext {
        match &self.memory {
            Some(coordinator) => {
                let request = RetrieveContextRequest {
                    run_id: run_id.clone(),
                    session_id: session_id.clone(),
                    prompt: prompt.to_string(),
                    token_budget: self.memory_token_budget,
                };
                match coordinator.retrieve_context(request).await {
                    Ok((context, _meta)) => context,
                    Err(err) => {
                        warn!(run_id = %run_id, error = %err, "memory retrieval failed, continuing with empty context");
                        MemoryContext { items: Vec::new(), total_tokens: 0 }
                    }
                }
            }
            None => MemoryContext { items: Vec::new(), total_tokens: 0 },
        }
    }

    pub async fn run(&self, input: RunEngineInput) -> Result<RunResult, OrchestratorError> {
        let mut state = ExecutionState::new();

        let run = self
            .state
            .create_run(
                input.session_id.clone(),
                input.agent_type.clone(),
                RunInput {
                    prompt: input.prompt.clone(),
                    model_id: input.model_id.clone(),
                    provider_id: input.provider_id.clone(),
                    metadata: input.metadata.clone(),
                },
            )
            .await?;
        self.emit(&run.run_id, "run.started", serde_json::json!({"runId": run.run_id.as_str()}));

        self.state.transition_run(&run.run_id, waypoint_types::RunStatus::Planning, None).await?;

        if let Some(reason) = evaluate(&state, &self.stop_policy) {
            return self.fail_early(&run.run_id, state, reason).await;
        }

        let context_bundle = self.context_bundle(&run.run_id, &input.session_id, &input.prompt).await;
        let plan_ctx = PlanContext {
            run: run.clone(),
            prompt: input.prompt.clone(),
            history: input.history,
            context_bundle,
        };
        let planned = self.agent.plan(plan_ctx).await?;
        state.iteration_count += 1;

        let generated_ids: Vec<TaskId> = planned.iter().map(|_| TaskId::new()).collect();
        let resolved_deps = crate::agent::resolve_plan_dependencies(&planned, &generated_ids);

        let params: Vec<NewTaskParams> = planned
            .iter()
            .zip(generated_ids.iter())
            .zip(resolved_deps.into_iter())
            .map(|((plan, id), deps)| NewTaskParams {
                task_type: plan.task_type.clone(),
                input: TaskInput { description: plan.description.clone(), ..Default::default() },
                dependencies: deps,
                max_retries: None,
                task_id: Some(id.clone()),
            })
            .collect();

        if !params.is_empty() {
            self.state.create_tasks(&run.run_id, params).await?;
        }
        self.state.transition_run(&run.run_id, waypoint_types::RunStatus::Running, None).await?;

        let executor = Arc::new(
            AgentTaskExecutor::new(self.agent.clone(), self.state.clone(), input.session_id.clone())
                .with_model(input.model_id.clone(), input.provider_id.clone()),
        );
        let mut scheduler = TaskScheduler::new(self.state.clone(), executor, self.retry_policy.clone());
        if let Some(bus) = &self.events {
            scheduler = scheduler.with_events(bus.clone());
        }
        scheduler.execute(&run.run_id).await?;

        let tasks = self.state.get_all_tasks(&run.run_id).await?;
        state.error_count += tasks.iter().filter(|t| t.status == waypoint_types::TaskStatus::Failed).count() as u32;
        if let Some(reason) = evaluate(&state, &self.stop_policy) {
            return self.fail_early(&run.run_id, state, reason).await;
        }

        let synthesis_ctx = SynthesisContext { run: run.clone(), tasks };
        let content = self.agent.synthesize(synthesis_ctx).await?;

        self.state
            .transition_run(
                &run.run_id,
                waypoint_types::RunStatus::Completed,
                Some(RunOutput { content: content.clone(), metadata: None }),
            )
            .await?;
        state.goal_satisfied = true;
        state.end_time = Some(chrono::Utc::now());
        self.emit(&run.run_id, "run.completed", serde_json::json!({"runId": run.run_id.as_str()}));
        info!(run_id = %run.run_id, "run completed");

        Ok(RunResult { run_id: run.run_id, output: content, execution_state: state })
    }

    /// Terminates the run on a stop condition hit before or during
    /// scheduling. `CANCELLED` is reachable from any non-terminal state
    /// (unlike `FAILED`, which the state machine only allows from
    /// `RUNNING`), so every early stop — external abort included — routes
    /// through `cancel_run` rather than risking an `InvalidRunStateTransition`
    /// when the run hasn't reached `RUNNING` yet.
    async fn fail_early(&self, run_id: &RunId, mut state: ExecutionState, reason: StopReason) -> Result<RunResult, OrchestratorError> {
        state.stop_reason = Some(reason);
        state.end_time = Some(chrono::Utc::now());
        self.state.cancel_run(run_id, format!("{reason:?}")).await?;
        self.emit(run_id, "run.failed", serde_json::json!({"runId": run_id.as_str(), "reason": format!("{reason:?}")}));
        Err(OrchestratorError::StoppedEarly(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use waypoint_runtime::{RunRepository, Task, TaskRepository};
    use waypoint_storage::InMemoryStorage;

    use crate::agent::PlannedTask;

    struct ScriptedAgent;

    #[async_trait]
    impl Agent for ScriptedAgent {
        async fn plan(&self, _ctx: PlanContext) -> Result<Vec<PlannedTask>, AgentError> {
            Ok(vec![
                PlannedTask { task_type: "shell".to_string(), description: "first".to_string(), depends_on_index: vec![] },
                PlannedTask { task_type: "shell".to_string(), description: "second".to_string(), depends_on_index: vec![0] },
            ])
        }

        async fn execute_task(&self, task: &Task, _ctx: TaskExecutionContext) -> Result<serde_json::Value, AgentError> {
            Ok(serde_json::json!({"ran": task.input.description}))
        }

        async fn synthesize(&self, ctx: SynthesisContext) -> Result<String, AgentError> {
            Ok(format!("completed {} tasks", ctx.tasks.len()))
        }
    }

    struct NeverPlans;

    #[async_trait]
    impl Agent for NeverPlans {
        async fn plan(&self, _ctx: PlanContext) -> Result<Vec<PlannedTask>, AgentError> {
            Err(AgentError::new("should never be called"))
        }

        async fn execute_task(&self, _task: &Task, _ctx: TaskExecutionContext) -> Result<serde_json::Value, AgentError> {
            unreachable!()
        }

        async fn synthesize(&self, _ctx: SynthesisContext) -> Result<String, AgentError> {
            unreachable!()
        }
    }

    fn new_state_manager() -> Arc<StateManager> {
        let storage: Arc<dyn waypoint_storage::StorageBackend> = Arc::new(InMemoryStorage::new());
        let runs = Arc::new(RunRepository::new(storage.clone()).unwrap());
        let tasks = Arc::new(TaskRepository::new(storage).unwrap());
        Arc::new(StateManager::new(runs, tasks))
    }

    #[tokio::test]
    async fn drives_a_run_from_planning_through_completion() {
        let state = new_state_manager();
        let engine = RunEngine::new(state.clone(), Arc::new(ScriptedAgent));

        let result = engine
            .run(RunEngineInput {
                session_id: SessionId::new(),
                agent_type: "coder".to_string(),
                prompt: "fix the bug".to_string(),
                history: Vec::new(),
                model_id: None,
                provider_id: None,
                metadata: None,
            })
            .await
            .unwrap();

        assert_eq!(result.output, "completed 2 tasks");
        assert!(result.execution_state.goal_satisfied);

        let run = state.get_run(&result.run_id).await.unwrap();
        assert_eq!(run.status, waypoint_types::RunStatus::Completed);

        let tasks = state.get_all_tasks(&result.run_id).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.status == waypoint_types::TaskStatus::Done));
    }

    #[tokio::test]
    async fn a_hard_limit_hit_before_planning_fails_the_run_without_calling_the_agent() {
        let state = new_state_manager();
        let engine = RunEngine::new(state.clone(), Arc::new(NeverPlans))
            .with_stop_policy(StopPolicyConfig { max_steps: 0, max_duration_ms: 0, max_errors: 0 });

        let err = engine
            .run(RunEngineInput {
                session_id: SessionId::new(),
                agent_type: "coder".to_string(),
                prompt: "x".to_string(),
                history: Vec::new(),
                model_id: None,
                provider_id: None,
                metadata: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::StoppedEarly(StopReason::TimeoutReached)));
    }
}
