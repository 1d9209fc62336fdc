use async_trait::async_trait;
use uuid::Uuid;
use waypoint_runtime::Task;

use crate::error::ExecutorError;
use crate::executor_trait::Executor;
use crate::shell::run_command;
use crate::types::{EnvironmentConfig, ExecutionEnvironment, ExecutorKind};

/// Stand-in for a remote/cloud-backed executor; see `docker.rs` for why
/// this doesn't provision a real remote sandbox.
pub struct CloudExecutor;

#[async_trait]
impl Executor for CloudExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Cloud
    }

    async fn create_environment(&self, _config: &EnvironmentConfig) -> Result<ExecutionEnvironment, ExecutorError> {
        Ok(ExecutionEnvironment {
            environment_id: format!("cloud-{}", Uuid::new_v4()),
            kind: ExecutorKind::Cloud,
        })
    }

    async fn execute_impl(&self, _env: &ExecutionEnvironment, task: &Task) -> Result<serde_json::Value, ExecutorError> {
        run_command(&task.input.description).await
    }

    async fn stream_logs(&self, _env: &ExecutionEnvironment) -> Result<Vec<String>, ExecutorError> {
        Ok(Vec::new())
    }

    async fn destroy_environment(&self, _env: ExecutionEnvironment) -> Result<(), ExecutorError> {
        Ok(())
    }
}
