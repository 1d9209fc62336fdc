use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use waypoint_memory::MemoryContext;
use waypoint_runtime::{Run, Task};
use waypoint_types::{RunId, SessionId, TaskId};

#[derive(Debug, Error)]
#[error("agent failed: {0}")]
pub struct AgentError(pub String);

impl AgentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// What `agent.plan` sees: the run as created, the raw prompt, any prior
/// turns for this session, and whatever memory the coordinator retrieved.
pub struct PlanContext {
    pub run: Run,
    pub prompt: String,
    pub history: Vec<String>,
    pub context_bundle: MemoryContext,
}

/// What `agent.executeTask` sees: enough to resolve dependency outputs and
/// pick a model, without handing over the whole run/task repository.
pub struct TaskExecutionContext {
    pub run_id: RunId,
    pub session_id: SessionId,
    pub dependencies: Vec<Task>,
    pub model_id: Option<String>,
    pub provider_id: Option<String>,
}

pub struct SynthesisContext {
    pub run: Run,
    pub tasks: Vec<Task>,
}

/// A planned task, prior to being turned into a `waypoint_runtime::Task`
/// with a generated id — `dependsOnIndex` lets a plan reference sibling
/// tasks positionally since they don't have ids yet.
#[derive(Debug, Clone)]
pub struct PlannedTask {
    pub task_type: String,
    pub description: String,
    pub depends_on_index: Vec<usize>,
}

/// The pluggable strategy that plans tasks, executes them, and
/// synthesizes the final output (spec §4.12, glossary "Agent"). One
/// concrete implementation per `agentType` is expected; `RunEngine` is
/// agnostic to what's behind this trait.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn plan(&self, ctx: PlanContext) -> Result<Vec<PlannedTask>, AgentError>;

    async fn execute_task(&self, task: &Task, ctx: TaskExecutionContext) -> Result<Value, AgentError>;

    async fn synthesize(&self, ctx: SynthesisContext) -> Result<String, AgentError>;
}

/// Resolves `depends_on_index` references into the `TaskId`s
/// `waypoint_runtime::NewTaskParams` expects, in plan order.
pub fn resolve_plan_dependencies(planned: &[PlannedTask], generated_ids: &[TaskId]) -> Vec<Vec<TaskId>> {
    planned
        .iter()
        .map(|p| {
            p.depends_on_index
                .iter()
                .filter_map(|idx| generated_ids.get(*idx).cloned())
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_positional_dependencies_to_ids() {
        let ids = vec![TaskId::new(), TaskId::new(), TaskId::new()];
        let planned = vec![
            PlannedTask { task_type: "shell".to_string(), description: "a".to_string(), depends_on_index: vec![] },
            PlannedTask { task_type: "shell".to_string(), description: "b".to_string(), depends_on_index: vec![0] },
        ];
        let resolved = resolve_plan_dependencies(&planned, &ids);
        assert!(resolved[0].is_empty());
        assert_eq!(resolved[1], vec![ids[0].clone()]);
    }
}
