use std::sync::Arc;

use waypoint_storage::{assert_runtime_state_semantics, ConcurrencyGate, StorageBackend, StorageSemantics};
use waypoint_types::{RunId, TaskId, TaskStatus};

use crate::entities::{Run, Task};
use crate::error::RuntimeError;

fn run_key(run_id: &RunId) -> String {
    format!("run:{run_id}")
}

/// Persists `Run` documents, one JSON value per `run:{runId}` key, narrowed
/// to a single entity per key per spec §4.6.
pub struct RunRepository {
    storage: Arc<dyn StorageBackend>,
    gate: ConcurrencyGate,
}

impl RunRepository {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Result<Self, RuntimeError> {
        assert_runtime_state_semantics(storage.as_ref(), StorageSemantics::Kv)?;
        Ok(Self {
            storage,
            gate: ConcurrencyGate::new(),
        })
    }

    pub async fn create(&self, run: &Run) -> Result<(), RuntimeError> {
        let run_id = run.run_id.clone();
        let run = run.clone();
        self.gate
            .block_concurrency_while(run_id.as_str(), || async move {
                self.storage.put(&run_key(&run.run_id), serde_json::to_value(&run)?).await?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, run_id: &RunId) -> Result<Option<Run>, RuntimeError> {
        match self.storage.get(&run_key(run_id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn update(&self, run: &Run) -> Result<(), RuntimeError> {
        let run_id = run.run_id.clone();
        let run = run.clone();
        self.gate
            .block_concurrency_while(run_id.as_str(), || async move {
                self.storage.put(&run_key(&run.run_id), serde_json::to_value(&run)?).await?;
                Ok(())
            })
            .await
    }

    pub async fn delete(&self, run_id: &RunId) -> Result<(), RuntimeError> {
        let run_id_owned = run_id.clone();
        self.gate
            .block_concurrency_while(run_id.as_str(), || async move {
                self.storage.delete(&run_key(&run_id_owned)).await?;
                Ok(())
            })
            .await
    }
}

fn task_key(run_id: &RunId, task_id: &TaskId) -> String {
    format!("task:{run_id}:{task_id}")
}

fn run_tasks_index_key(run_id: &RunId) -> String {
    format!("run_tasks:{run_id}")
}

/// Persists `Task` documents under `task:{runId}:{taskId}`, with an
/// insertion-ordered index of `taskId`s at `run_tasks:{runId}` per spec
/// §4.6. Every write is wrapped in the same per-`runId` `ConcurrencyGate`
/// used by `RunRepository`, so a run's tasks and its index never observe a
/// torn write; `delete_by_run` reads the index inside that same critical
/// section to avoid a read-then-delete race against a concurrent `create`.
pub struct TaskRepository {
    storage: Arc<dyn StorageBackend>,
    gate: ConcurrencyGate,
}

impl TaskRepository {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Result<Self, RuntimeError> {
        assert_runtime_state_semantics(storage.as_ref(), StorageSemantics::Kv)?;
        Ok(Self {
            storage,
            gate: ConcurrencyGate::new(),
        })
    }

    async fn read_index(&self, run_id: &RunId) -> Result<Vec<TaskId>, RuntimeError> {
        match self.storage.get(&run_tasks_index_key(run_id)).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    async fn write_index(&self, run_id: &RunId, index: &[TaskId]) -> Result<(), RuntimeError> {
        self.storage
            .put(&run_tasks_index_key(run_id), serde_json::to_value(index)?)
            .await?;
        Ok(())
    }

    /// Inserts many tasks atomically from the caller's perspective: all
    /// writes happen inside one critical section. Aborting on the first
    /// validation failure is the caller's (`StateManager::create_tasks`)
    /// responsibility — this method assumes the tasks are already valid.
    pub async fn create_many(&self, run_id: &RunId, tasks: &[Task]) -> Result<(), RuntimeError> {
        let run_id = run_id.clone();
        let tasks = tasks.to_vec();
        self.gate
            .block_concurrency_while(run_id.as_str(), || async move {
                let mut index = self.read_index(&run_id).await?;
                for task in &tasks {
                    self.storage
                        .put(&task_key(&run_id, &task.task_id), serde_json::to_value(task)?)
                        .await?;
                    index.push(task.task_id.clone());
                }
                self.write_index(&run_id, &index).await?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, run_id: &RunId, task_id: &TaskId) -> Result<Option<Task>, RuntimeError> {
        match self.storage.get(&task_key(run_id, task_id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn update(&self, task: &Task) -> Result<(), RuntimeError> {
        let run_id = task.run_id.clone();
        let task = task.clone();
        self.gate
            .block_concurrency_while(run_id.as_str(), || async move {
                self.storage
                    .put(&task_key(&task.run_id, &task.task_id), serde_json::to_value(&task)?)
                    .await?;
                Ok(())
            })
            .await
    }

    pub async fn get_by_run(&self, run_id: &RunId) -> Result<Vec<Task>, RuntimeError> {
        let index = self.read_index(run_id).await?;
        let mut tasks = Vec::with_capacity(index.len());
        for task_id in index {
            if let Some(task) = self.get(run_id, &task_id).await? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    pub async fn get_by_run_and_status(
        &self,
        run_id: &RunId,
        status: TaskStatus,
    ) -> Result<Vec<Task>, RuntimeError> {
        Ok(self
            .get_by_run(run_id)
            .await?
            .into_iter()
            .filter(|task| task.status == status)
            .collect())
    }

    pub async fn delete_by_run(&self, run_id: &RunId) -> Result<(), RuntimeError> {
        let run_id = run_id.clone();
        self.gate
            .block_concurrency_while(run_id.as_str(), || async move {
                let index = self.read_index(&run_id).await?;
                for task_id in &index {
                    self.storage.delete(&task_key(&run_id, task_id)).await?;
                }
                self.storage.delete(&run_tasks_index_key(&run_id)).await?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{NewTaskParams, Run, RunInput, TaskInput};
    use waypoint_storage::InMemoryStorage;

    fn sample_run() -> Run {
        Run::new(
            waypoint_types::SessionId::new(),
            "coder",
            RunInput {
                prompt: "fix the bug".to_string(),
                model_id: None,
                provider_id: None,
                metadata: None,
            },
        )
    }

    fn sample_task(run_id: RunId, dependencies: Vec<TaskId>) -> Task {
        Task::new(
            run_id,
            NewTaskParams {
                task_type: "shell".to_string(),
                input: TaskInput {
                    description: "run tests".to_string(),
                    expected_output: None,
                    metadata: None,
                    ..Default::default()
                },
                dependencies,
                max_retries: None,
                task_id: None,
            },
        )
    }

    #[tokio::test]
    async fn run_roundtrips_through_create_and_get() {
        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
        let repo = RunRepository::new(storage).unwrap();
        let run = sample_run();
        repo.create(&run).await.unwrap();
        let fetched = repo.get(&run.run_id).await.unwrap().unwrap();
        assert_eq!(fetched.run_id, run.run_id);
    }

    #[tokio::test]
    async fn tasks_preserve_insertion_order_in_the_index() {
        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
        let repo = TaskRepository::new(storage).unwrap();
        let run_id = RunId::new();
        let tasks = vec![
            sample_task(run_id.clone(), Vec::new()),
            sample_task(run_id.clone(), Vec::new()),
            sample_task(run_id.clone(), Vec::new()),
        ];
        let expected_order: Vec<TaskId> = tasks.iter().map(|t| t.task_id.clone()).collect();
        repo.create_many(&run_id, &tasks).await.unwrap();

        let fetched = repo.get_by_run(&run_id).await.unwrap();
        let fetched_order: Vec<TaskId> = fetched.iter().map(|t| t.task_id.clone()).collect();
        assert_eq!(fetched_order, expected_order);
    }

    #[tokio::test]
    async fn delete_by_run_removes_every_task_and_the_index() {
        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
        let repo = TaskRepository::new(storage).unwrap();
        let run_id = RunId::new();
        let tasks = vec![sample_task(run_id.clone(), Vec::new())];
        repo.create_many(&run_id, &tasks).await.unwrap();

        repo.delete_by_run(&run_id).await.unwrap();

        assert!(repo.get_by_run(&run_id).await.unwrap().is_empty());
    }
}
