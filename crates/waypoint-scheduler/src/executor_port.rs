use async_trait::async_trait;
use waypoint_runtime::Task;

/// The scheduler's view of "run this task to completion" — deliberately
/// narrower than `waypoint-executor`'s `Executor` lifecycle trait (create
/// environment / execute / stream logs / destroy environment). The
/// scheduler doesn't care how a task's sandbox is provisioned or torn down;
/// it only needs one fallible call per ready task. `waypoint-executor`
/// provides an adapter that sequences its own lifecycle behind this port.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<serde_json::Value, TaskExecutionError>;
}

#[derive(Debug, thiserror::Error)]
#[error("task execution failed: {0}")]
pub struct TaskExecutionError(pub String);

impl TaskExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
