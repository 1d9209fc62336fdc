use std::sync::Arc;

use serde_json::Value;
use waypoint_storage::ConcurrencyGate;
use waypoint_types::{RunId, RunStatus, TaskId, TaskStatus};

use crate::entities::{NewTaskParams, Run, RunInput, RunOutput, Task};
use crate::error::RuntimeError;
use crate::repository::{RunRepository, TaskRepository};

fn validate_run_transition(from: RunStatus, to: RunStatus) -> bool {
    use RunStatus::*;
    if to == Cancelled {
        return !from.is_terminal();
    }
    matches!(
        (from, to),
        (Created, Planning) | (Planning, Running) | (Paused, Running) | (Running, Completed | Paused | Failed)
    )
}

fn validate_task_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Pending, Ready | Blocked | Cancelled)
            | (Blocked, Ready | Cancelled)
            | (Ready, Running | Cancelled)
            | (Running, Done | Failed | Cancelled)
            | (Failed, Retrying)
            | (Retrying, Ready)
    )
}

/// Transactional façade over `RunRepository`/`TaskRepository`, per spec
/// §4.7. Every public method runs under the same per-`runId`
/// `ConcurrencyGate` the repositories use, so a transition and its
/// dependent reads (e.g. `get_ready_tasks`) never interleave with a
/// concurrent write to the same run.
pub struct StateManager {
    runs: Arc<RunRepository>,
    tasks: Arc<TaskRepository>,
    gate: ConcurrencyGate,
}

impl StateManager {
    pub fn new(runs: Arc<RunRepository>, tasks: Arc<TaskRepository>) -> Self {
        Self {
            runs,
            tasks,
            gate: ConcurrencyGate::new(),
        }
    }

    pub async fn create_run(
        &self,
        session_id: waypoint_types::SessionId,
        agent_type: impl Into<String>,
        input: RunInput,
    ) -> Result<Run, RuntimeError> {
        let run = Run::new(session_id, agent_type, input);
        self.runs.create(&run).await?;
        Ok(run)
    }

    pub async fn transition_run(
        &self,
        run_id: &RunId,
        new_state: RunStatus,
        output: Option<RunOutput>,
    ) -> Result<Run, RuntimeError> {
        let run_id = run_id.clone();
        self.gate
            .block_concurrency_while(run_id.as_str(), || async move {
                let mut run = self
                    .runs
                    .get(&run_id)
                    .await?
                    .ok_or_else(|| RuntimeError::RunNotFound { run_id: run_id.clone() })?;
                if !validate_run_transition(run.status, new_state) {
                    return Err(RuntimeError::InvalidRunStateTransition {
                        run_id: run_id.clone(),
                        from: run.status,
                        to: new_state,
                    });
                }
                run.status = new_state;
                if output.is_some() {
                    run.output = output;
                }
                run.updated_at = chrono::Utc::now();
                self.runs.update(&run).await?;
                Ok(run)
            })
            .await
    }

    /// Inserts every task in `params` under one critical section, aborting
    /// (without persisting any of them) on the first invalid dependency
    /// reference.
    pub async fn create_tasks(
        &self,
        run_id: &RunId,
        params: Vec<NewTaskParams>,
    ) -> Result<Vec<Task>, RuntimeError> {
        let tasks: Vec<Task> = params
            .into_iter()
            .map(|p| Task::new(run_id.clone(), p))
            .collect();
        let known_ids: std::collections::HashSet<&TaskId> = tasks.iter().map(|t| &t.task_id).collect();
        for task in &tasks {
            for dependency in &task.dependencies {
                if !known_ids.contains(dependency) {
                    return Err(RuntimeError::TaskNotFound {
                        run_id: run_id.clone(),
                        task_id: dependency.clone(),
                    });
                }
            }
        }
        self.tasks.create_many(run_id, &tasks).await?;
        Ok(tasks)
    }

    pub async fn transition_task(
        &self,
        run_id: &RunId,
        task_id: &TaskId,
        new_state: TaskStatus,
        result: Option<Value>,
    ) -> Result<Task, RuntimeError> {
        let run_id_owned = run_id.clone();
        let task_id_owned = task_id.clone();
        self.gate
            .block_concurrency_while(run_id.as_str(), || async move {
                let mut task = self
                    .tasks
                    .get(&run_id_owned, &task_id_owned)
                    .await?
                    .ok_or_else(|| RuntimeError::TaskNotFound {
                        run_id: run_id_owned.clone(),
                        task_id: task_id_owned.clone(),
                    })?;
                if !validate_task_transition(task.status, new_state) {
                    return Err(RuntimeError::InvalidTaskStateTransition {
                        task_id: task_id_owned.clone(),
                        from: task.status,
                        to: new_state,
                    });
                }
                if new_state == TaskStatus::Retrying {
                    task.retry_count += 1;
                }
                task.status = new_state;
                match new_state {
                    TaskStatus::Done => task.output = result,
                    TaskStatus::Failed => {
                        task.error = result.and_then(|v| v.as_str().map(str::to_string));
                    }
                    _ => {}
                }
                task.updated_at = chrono::Utc::now();
                self.tasks.update(&task).await?;
                Ok(task)
            })
            .await
    }

    pub async fn get_run(&self, run_id: &RunId) -> Result<Run, RuntimeError> {
        self.runs
            .get(run_id)
            .await?
            .ok_or_else(|| RuntimeError::RunNotFound { run_id: run_id.clone() })
    }

    pub async fn get_all_tasks(&self, run_id: &RunId) -> Result<Vec<Task>, RuntimeError> {
        self.tasks.get_by_run(run_id).await
    }

    pub async fn get_ready_tasks(&self, run_id: &RunId) -> Result<Vec<Task>, RuntimeError> {
        let tasks = self.tasks.get_by_run(run_id).await?;
        let by_id: std::collections::HashMap<&TaskId, TaskStatus> =
            tasks.iter().map(|t| (&t.task_id, t.status)).collect();
        Ok(tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Ready))
            .filter(|t| {
                t.dependencies
                    .iter()
                    .all(|dep| by_id.get(dep).copied() == Some(TaskStatus::Done))
            })
            .cloned()
            .collect())
    }

    /// Cancels the run and all of its non-terminal tasks in one critical
    /// section, per spec §4.7.
    pub async fn cancel_run(&self, run_id: &RunId, reason: impl Into<String>) -> Result<Run, RuntimeError> {
        let reason = reason.into();
        let run_id = run_id.clone();
        self.gate
            .block_concurrency_while(run_id.as_str(), || async move {
                let mut run = self
                    .runs
                    .get(&run_id)
                    .await?
                    .ok_or_else(|| RuntimeError::RunNotFound { run_id: run_id.clone() })?;
                if !run.status.is_terminal() {
                    run.status = RunStatus::Cancelled;
                    run.updated_at = chrono::Utc::now();
                    run.output = Some(RunOutput {
                        content: String::new(),
                        metadata: Some(serde_json::json!({ "cancelReason": reason })),
                    });
                    self.runs.update(&run).await?;
                }

                let tasks = self.tasks.get_by_run(&run_id).await?;
                for mut task in tasks {
                    if !task.status.is_terminal() {
                        task.status = TaskStatus::Cancelled;
                        task.updated_at = chrono::Utc::now();
                        self.tasks.update(&task).await?;
                    }
                }
                Ok(run)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::TaskInput;
    use std::sync::Arc;
    use waypoint_storage::{InMemoryStorage, StorageBackend};
    use waypoint_types::SessionId;

    fn new_state_manager() -> StateManager {
        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
        let runs = Arc::new(RunRepository::new(storage.clone()).unwrap());
        let tasks = Arc::new(TaskRepository::new(storage).unwrap());
        StateManager::new(runs, tasks)
    }

    #[tokio::test]
    async fn run_moves_through_the_happy_path() {
        let sm = new_state_manager();
        let run = sm
            .create_run(
                SessionId::new(),
                "coder",
                RunInput {
                    prompt: "do the thing".to_string(),
                    model_id: None,
                    provider_id: None,
                    metadata: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Created);

        let run = sm.transition_run(&run.run_id, RunStatus::Planning, None).await.unwrap();
        assert_eq!(run.status, RunStatus::Planning);
        let run = sm.transition_run(&run.run_id, RunStatus::Running, None).await.unwrap();
        let run = sm
            .transition_run(
                &run.run_id,
                RunStatus::Completed,
                Some(RunOutput { content: "done".to_string(), metadata: None }),
            )
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn invalid_run_transition_is_rejected() {
        let sm = new_state_manager();
        let run = sm
            .create_run(
                SessionId::new(),
                "coder",
                RunInput { prompt: "x".to_string(), model_id: None, provider_id: None, metadata: None },
            )
            .await
            .unwrap();
        let err = sm.transition_run(&run.run_id, RunStatus::Completed, None).await.unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidRunStateTransition { .. }));
    }

    #[tokio::test]
    async fn cancel_is_allowed_from_any_non_terminal_state() {
        let sm = new_state_manager();
        let run = sm
            .create_run(
                SessionId::new(),
                "coder",
                RunInput { prompt: "x".to_string(), model_id: None, provider_id: None, metadata: None },
            )
            .await
            .unwrap();
        let run = sm.transition_run(&run.run_id, RunStatus::Cancelled, None).await.unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn get_ready_tasks_respects_dependencies() {
        let sm = new_state_manager();
        let run = sm
            .create_run(
                SessionId::new(),
                "coder",
                RunInput { prompt: "x".to_string(), model_id: None, provider_id: None, metadata: None },
            )
            .await
            .unwrap();

        let first = NewTaskParams {
            task_type: "shell".to_string(),
            input: TaskInput { description: "step 1".to_string(), expected_output: None, metadata: None, ..Default::default() },
            dependencies: Vec::new(),
            max_retries: None,
        };
        let tasks = sm.create_tasks(&run.run_id, vec![first]).await.unwrap();
        let first_id = tasks[0].task_id.clone();

        let second = NewTaskParams {
            task_type: "shell".to_string(),
            input: TaskInput { description: "step 2".to_string(), expected_output: None, metadata: None, ..Default::default() },
            dependencies: vec![first_id.clone()],
            max_retries: None,
        };
        sm.create_tasks(&run.run_id, vec![second]).await.unwrap();

        let ready = sm.get_ready_tasks(&run.run_id).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].task_id, first_id);

        sm.transition_task(&run.run_id, &first_id, TaskStatus::Running, None).await.unwrap();
        sm.transition_task(&run.run_id, &first_id, TaskStatus::Done, Some(serde_json::json!("ok")))
            .await
            .unwrap();

        let ready = sm.get_ready_tasks(&run.run_id).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_ne!(ready[0].task_id, first_id);
    }

    #[tokio::test]
    async fn cancel_run_drives_non_terminal_tasks_to_cancelled() {
        let sm = new_state_manager();
        let run = sm
            .create_run(
                SessionId::new(),
                "coder",
                RunInput { prompt: "x".to_string(), model_id: None, provider_id: None, metadata: None },
            )
            .await
            .unwrap();
        let params = NewTaskParams {
            task_type: "shell".to_string(),
            input: TaskInput { description: "step".to_string(), expected_output: None, metadata: None, ..Default::default() },
            dependencies: Vec::new(),
            max_retries: None,
        };
        sm.create_tasks(&run.run_id, vec![params]).await.unwrap();

        let run = sm.cancel_run(&run.run_id, "user requested").await.unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);

        let tasks = sm.tasks.get_by_run(&run.run_id).await.unwrap();
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Cancelled));
    }
}
