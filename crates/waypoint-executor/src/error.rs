use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to provision environment: {0}")]
    Provisioning(String),
    #[error("task execution timed out after {0}ms")]
    Timeout(u64),
    #[error("task execution failed: {0}")]
    Execution(String),
    #[error("failed to destroy environment {environment_id}: {message}")]
    Teardown { environment_id: String, message: String },
    #[error("no executor registered for kind {0:?}")]
    NoExecutorForKind(crate::types::ExecutorKind),
    #[error("executor registry must not be empty")]
    EmptyRegistry,
    #[error("executor hint {0:?} is not registered")]
    UnknownExecutorHint(String),
}
