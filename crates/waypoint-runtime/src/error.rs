use thiserror::Error;
use waypoint_types::{RunId, RunStatus, TaskId, TaskStatus};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("run {run_id} not found")]
    RunNotFound { run_id: RunId },
    #[error("task {task_id} not found in run {run_id}")]
    TaskNotFound { run_id: RunId, task_id: TaskId },
    #[error("invalid run state transition for {run_id}: {from:?} -> {to:?}")]
    InvalidRunStateTransition {
        run_id: RunId,
        from: RunStatus,
        to: RunStatus,
    },
    #[error("invalid task state transition for {task_id}: {from:?} -> {to:?}")]
    InvalidTaskStateTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error(transparent)]
    Storage(#[from] waypoint_storage::StorageError),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
