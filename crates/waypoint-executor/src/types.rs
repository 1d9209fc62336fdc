use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Local,
    Docker,
    Cloud,
}

impl ExecutorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Docker => "docker",
            Self::Cloud => "cloud",
        }
    }

    pub fn from_str_loose(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "docker" => Some(Self::Docker),
            "cloud" => Some(Self::Cloud),
            _ => None,
        }
    }
}

/// Caller-supplied provisioning parameters; what an environment actually
/// needs to run varies by kind, so the payload is free-form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub extra: Value,
}

/// A provisioned place to run a task. Carries the id an implementation
/// needs to reach it again (e.g. a container id), opaque to everyone else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEnvironment {
    pub environment_id: String,
    pub kind: ExecutorKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub output: Value,
    pub duration_ms: u64,
    pub timed_out: bool,
}
