use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use waypoint_runtime::Task;
use waypoint_scheduler::{TaskExecutionError, TaskExecutor};

use crate::router::ExecutorRouter;
use crate::types::EnvironmentConfig;

/// Implements `waypoint-scheduler`'s narrow `TaskExecutor` port by
/// sequencing this crate's richer create/execute/destroy lifecycle behind
/// one call: the scheduler neither knows nor needs to know that a
/// provisioning and teardown step happened around the work it asked for.
pub struct RoutedTaskExecutor {
    router: Arc<ExecutorRouter>,
}

impl RoutedTaskExecutor {
    pub fn new(router: Arc<ExecutorRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl TaskExecutor for RoutedTaskExecutor {
    async fn execute(&self, task: &Task) -> Result<serde_json::Value, TaskExecutionError> {
        let (executor, _selection) = self.router.select(task);
        let config = EnvironmentConfig {
            timeout_ms: task.input.estimated_duration_ms,
            extra: serde_json::Value::Null,
        };

        let env = executor
            .create_environment(&config)
            .await
            .map_err(|err| TaskExecutionError::new(err.to_string()))?;

        let outcome = executor.execute_task(&env, task, &config).await;

        if let Err(err) = executor.destroy_environment(env).await {
            warn!(task_id = %task.task_id, error = %err, "failed to tear down execution environment");
        }

        outcome.map(|o| o.output).map_err(|err| TaskExecutionError::new(err.to_string()))
    }
}
