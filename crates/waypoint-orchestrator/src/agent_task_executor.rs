use std::sync::Arc;

use async_trait::async_trait;
use waypoint_runtime::{StateManager, Task};
use waypoint_scheduler::{TaskExecutionError, TaskExecutor};
use waypoint_types::{RunId, SessionId, TaskStatus};

use crate::agent::{Agent, TaskExecutionContext};

/// Adapts an `Agent` to the scheduler's narrow `TaskExecutor` port, per spec
/// §4.12 point 4: for each ready task it resolves the task's already-DONE
/// dependencies into `Task` values and calls `agent.executeTask` with them,
/// rather than handing the agent direct access to the state manager.
pub struct AgentTaskExecutor {
    agent: Arc<dyn Agent>,
    state: Arc<StateManager>,
    session_id: SessionId,
    model_id: Option<String>,
    provider_id: Option<String>,
}

impl AgentTaskExecutor {
    pub fn new(agent: Arc<dyn Agent>, state: Arc<StateManager>, session_id: SessionId) -> Self {
        Self { agent, state, session_id, model_id: None, provider_id: None }
    }

    pub fn with_model(mut self, model_id: Option<String>, provider_id: Option<String>) -> Self {
        self.model_id = model_id;
        self.provider_id = provider_id;
        self
    }

    async fn resolve_dependencies(&self, run_id: &RunId, task: &Task) -> Result<Vec<Task>, TaskExecutionError> {
        if task.dependencies.is_empty() {
            return Ok(Vec::new());
        }
        let all = self
            .state
            .get_all_tasks(run_id)
            .await
            .map_err(|err| TaskExecutionError::new(err.to_string()))?;
        let by_id: std::collections::HashMap<_, _> = all.into_iter().map(|t| (t.task_id.clone(), t)).collect();
        Ok(task
            .dependencies
            .iter()
            .filter_map(|dep_id| by_id.get(dep_id).cloned())
            .filter(|dep| dep.status == TaskStatus::Done)
            .collect())
    }
}

#[async_trait]
impl TaskExecutor for AgentTaskExecutor {
    async fn execute(&self, task: &Task) -> Result<serde_json::Value, TaskExecutionError> {
        let dependencies = self.resolve_dependencies(&task.run_id, task).await?;
        let ctx = TaskExecutionContext {
            run_id: task.run_id.clone(),
            session_id: self.session_id.clone(),
            dependencies,
            model_id: self.model_id.clone(),
            provider_id: self.provider_id.clone(),
        };
        self.agent
            .execute_task(task, ctx)
            .await
            .map_err(|err| TaskExecutionError::new(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use waypoint_runtime::{NewTaskParams, RunRepository, TaskInput, TaskRepository};
    use waypoint_storage::{InMemoryStorage, StorageBackend};

    use crate::agent::{AgentError, PlanContext, PlannedTask, SynthesisContext};

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        async fn plan(&self, _ctx: PlanContext) -> Result<Vec<PlannedTask>, AgentError> {
            Ok(Vec::new())
        }

        async fn execute_task(&self, task: &Task, ctx: TaskExecutionContext) -> Result<serde_json::Value, AgentError> {
            Ok(serde_json::json!({
                "description": task.input.description,
                "dependencyCount": ctx.dependencies.len(),
            }))
        }

        async fn synthesize(&self, _ctx: SynthesisContext) -> Result<String, AgentError> {
            Ok(String::new())
        }
    }

    fn new_state_manager() -> Arc<StateManager> {
        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
        let runs = Arc::new(RunRepository::new(storage.clone()).unwrap());
        let tasks = Arc::new(TaskRepository::new(storage).unwrap());
        Arc::new(StateManager::new(runs, tasks))
    }

    #[tokio::test]
    async fn resolves_only_done_dependencies() {
        let state = new_state_manager();
        let run = state
            .create_run(
                waypoint_types::SessionId::new(),
                "coder",
                waypoint_runtime::RunInput { prompt: "x".to_string(), model_id: None, provider_id: None, metadata: None },
            )
            .await
            .unwrap();

        let dep = state
            .create_tasks(
                &run.run_id,
                vec![NewTaskParams {
                    task_type: "shell".to_string(),
                    input: TaskInput { description: "dep".to_string(), ..Default::default() },
                    dependencies: Vec::new(),
                    max_retries: None,
                    task_id: None,
                }],
            )
            .await
            .unwrap();
        let dep_id = dep[0].task_id.clone();
        state.transition_task(&run.run_id, &dep_id, TaskStatus::Running, None).await.unwrap();
        state.transition_task(&run.run_id, &dep_id, TaskStatus::Done, Some(serde_json::json!("ok"))).await.unwrap();

        let child = state
            .create_tasks(
                &run.run_id,
                vec![NewTaskParams {
                    task_type: "shell".to_string(),
                    input: TaskInput { description: "child".to_string(), ..Default::default() },
                    dependencies: vec![dep_id],
                    max_retries: None,
                    task_id: None,
                }],
            )
            .await
            .unwrap();

        let executor = AgentTaskExecutor::new(Arc::new(EchoAgent), state.clone(), waypoint_types::SessionId::new());
        let output = executor.execute(&child[0]).await.unwrap();
        assert_eq!(output["dependencyCount"], 1);
    }
}
