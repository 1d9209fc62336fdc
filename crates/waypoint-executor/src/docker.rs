use async_trait::async_trait;
use uuid::Uuid;
use waypoint_runtime::Task;

use crate::error::ExecutorError;
use crate::executor_trait::Executor;
use crate::shell::run_command;
use crate::types::{EnvironmentConfig, ExecutionEnvironment, ExecutorKind};

/// Stand-in for a container-backed executor. Real container provisioning
/// is out of scope here (spec Non-goals name "sandbox/container plugin
/// internals, consumed through an Executor port") — this implementation
/// exists so the router has a real `docker`-kind executor to select, not
/// to model container lifecycle.
pub struct DockerExecutor;

#[async_trait]
impl Executor for DockerExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Docker
    }

    async fn create_environment(&self, _config: &EnvironmentConfig) -> Result<ExecutionEnvironment, ExecutorError> {
        Ok(ExecutionEnvironment {
            environment_id: format!("docker-{}", Uuid::new_v4()),
            kind: ExecutorKind::Docker,
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
