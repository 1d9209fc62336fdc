use std::time::{Duration, Instant};

use async_trait::async_trait;
use waypoint_runtime::Task;

use crate::error::ExecutorError;
use crate::types::{EnvironmentConfig, ExecutionEnvironment, ExecutionOutcome, ExecutorKind};

const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Sandbox/cloud execution lifecycle, per spec §4.11. `execute_task` is a
/// Template Method: the default implementation owns timeout enforcement and
/// duration tracking, and delegates the actual work to `execute_impl`,
/// which each concrete executor overrides.
#[async_trait]
pub trait Executor: Send + Sync {
    fn kind(&self) -> ExecutorKind;

    async fn create_environment(&self, config: &EnvironmentConfig) -> Result<ExecutionEnvironment, ExecutorError>;

    async fn execute_task(
        &self,
        env: &ExecutionEnvironment,
        task: &Task,
        config: &EnvironmentConfig,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let timeout = Duration::from_millis(config.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
        let start = Instant::now();
        match tokio::time::timeout(timeout, self.execute_impl(env, task)).await {
            Ok(Ok(output)) => Ok(ExecutionOutcome {
                output,
                duration_ms: start.elapsed().as_millis() as u64,
                timed_out: false,
            }),
            Ok(Err(err)) => Err(err),
            Err(_elapsed) => Err(ExecutorError::Timeout(timeout.as_millis() as u64)),
        }
    }

    /// Protected hook: the actual work of running `task` inside `env`.
    /// Never call directly — go through `execute_task` so timeout and
    /// duration tracking always apply.
    async fn execute_impl(&self, env: &ExecutionEnvironment, task: &Task) -> Result<serde_json::Value, ExecutorError>;

    async fn stream_logs(&self, env: &ExecutionEnvironment) -> Result<Vec<String>, ExecutorError>;

    async fn destroy_environment(&self, env: ExecutionEnvironment) -> Result<(), ExecutorError>;
}
