use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use waypoint_types::{RunId, RunStatus, SessionId, TaskId, TaskStatus};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInput {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub session_id: SessionId,
    pub agent_type: String,
    pub input: RunInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<RunOutput>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(session_id: SessionId, agent_type: impl Into<String>, input: RunInput) -> Self {
        let now = Utc::now();
        Self {
            run_id: RunId::new(),
            session_id,
            agent_type: agent_type.into(),
            input,
            output: None,
            status: RunStatus::Created,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskInput {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Pins dispatch to a specific registered executor id, per spec §4.11's
    /// routing rule 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_hint: Option<String>,
    #[serde(default)]
    pub requires_gpu: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTaskParams {
    pub task_type: String,
    pub input: TaskInput,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Lets a caller (e.g. a plan that references sibling tasks before
    /// they exist) pin the id ahead of creation, instead of discovering it
    /// only after `Task::new` returns.
    #[serde(default)]
    pub task_id: Option<TaskId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub run_id: RunId,
    pub task_id: TaskId,
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: TaskStatus,
    pub dependencies: Vec<TaskId>,
    pub input: TaskInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(run_id: RunId, params: NewTaskParams) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            task_id: params.task_id.unwrap_or_else(TaskId::new),
            task_type: params.task_type,
            status: TaskStatus::Pending,
            dependencies: params.dependencies,
            input: params.input,
            output: None,
            error: None,
            retry_count: 0,
            max_retries: params.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn is_ready(&self, dependency_statuses: &[TaskStatus]) -> bool {
        self.dependencies.is_empty()
            || dependency_statuses.iter().all(|status| *status == TaskStatus::Done)
    }
}
