use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;
use waypoint_runtime::Task;

use crate::error::ExecutorError;
use crate::executor_trait::Executor;
use crate::shell::run_command;
use crate::types::{EnvironmentConfig, ExecutionEnvironment, ExecutorKind};

/// Runs tasks as subprocesses on the host, per spec §4.11's "local" kind.
pub struct LocalExecutor {
    logs: Arc<Mutex<HashMap<String, Vec<String>>>>,
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self { logs: Arc::new(Mutex::new(HashMap::new())) }
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Local
    }

    async fn create_environment(&self, _config: &EnvironmentConfig) -> Result<ExecutionEnvironment, ExecutorError> {
        let environment_id = format!("local-{}", Uuid::new_v4());
        self.logs.lock().await.insert(environment_id.clone(), Vec::new());
        Ok(ExecutionEnvironment { environment_id, kind: ExecutorKind::Local })
    }

    async fn execute_impl(&self, env: &ExecutionEnvironment, task: &Task) -> Result<serde_json::Value, ExecutorError> {
        let result = run_command(&task.input.description).await?;
        if let Some(entries) = self.logs.lock().await.get_mut(&env.environment_id) {
            entries.push(format!("executed task {}", task.task_id));
        }
        Ok(result)
    }

    async fn stream_logs(&self, env: &ExecutionEnvironment) -> Result<Vec<String>, ExecutorError> {
        Ok(self.logs.lock().await.get(&env.environment_id).cloned().unwrap_or_default())
    }

    async fn destroy_environment(&self, env: ExecutionEnvironment) -> Result<(), ExecutorError> {
        self.logs.lock().await.remove(&env.environment_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_runtime::{NewTaskParams, TaskInput};

    fn echo_task(command: &str) -> Task {
        Task::new(
            waypoint_types::RunId::new(),
            NewTaskParams {
                task_type: "shell".to_string(),
                input: TaskInput { description: command.to_string(), ..Default::default() },
                dependencies: Vec::new(),
                max_retries: None,
                task_id: None,
            },
        )
    }

    #[tokio::test]
    async fn runs_a_command_and_captures_stdout() {
        let executor = LocalExecutor::new();
        let env = executor.create_environment(&EnvironmentConfig::default()).await.unwrap();
        let task = echo_task("echo hello");

        let outcome = executor.execute_task(&env, &task, &EnvironmentConfig::default()).await.unwrap();
        assert_eq!(outcome.output["stdout"].as_str().unwrap().trim(), "hello");
        assert!(!outcome.timed_out);

        let logs = executor.stream_logs(&env).await.unwrap();
        assert_eq!(logs.len(), 1);

        executor.destroy_environment(env).await.unwrap();
    }

    #[tokio::test]
    async fn a_slow_command_times_out() {
        let executor = LocalExecutor::new();
        let env = executor.create_environment(&EnvironmentConfig::default()).await.unwrap();
        let task = echo_task("sleep 5");
        let config = EnvironmentConfig { timeout_ms: Some(10), extra: serde_json::Value::Null };

        let err = executor.execute_task(&env, &task, &config).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Timeout(_)));
    }
}
