use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use waypoint_orchestrator::{Agent, AgentError, PlanContext, PlannedTask, SynthesisContext, TaskExecutionContext};
use waypoint_providers::{ChatMessage, GatewayCallContext, LLMGateway};
use waypoint_runtime::Task;
use waypoint_types::{ModelSpec, Phase};

/// The demo agent wired into `waypoint-engine run`: plans a single
/// "respond" task carrying the raw prompt, executes it through the
/// `LLMGateway`, and synthesizes the run output from whatever the task(s)
/// produced. A real agent would decompose a prompt into a dependency graph
/// of tool calls; this one exists to exercise the `RunEngine`/`Executor`
/// plumbing end to end with a deterministic provider.
pub struct SimpleAgent {
    gateway: Arc<LLMGateway>,
    default_model: ModelSpec,
}

impl SimpleAgent {
    pub fn new(gateway: Arc<LLMGateway>, default_model: ModelSpec) -> Self {
        Self { gateway, default_model }
    }
}

#[async_trait]
impl Agent for SimpleAgent {
    async fn plan(&self, ctx: PlanContext) -> Result<Vec<PlannedTask>, AgentError> {
        Ok(vec![PlannedTask {
            task_type: "respond".to_string(),
            description: ctx.prompt,
            depends_on_index: Vec::new(),
        }])
    }

    async fn execute_task(&self, task: &Task, ctx: TaskExecutionContext) -> Result<serde_json::Value, AgentError> {
        let call_ctx = GatewayCallContext {
            run_id: ctx.run_id.clone(),
            session_id: ctx.session_id.clone(),
            task_id: Some(task.task_id.clone()),
            agent_type: "simple".to_string(),
            phase: Phase::Task,
            idempotency_key: format!("task:{}:{}", ctx.run_id, task.task_id),
        };
        let model = ctx
            .model_id
            .clone()
            .zip(ctx.provider_id.clone())
            .map(|(model_id, provider_id)| ModelSpec::new(provider_id, model_id));

        let response = self
            .gateway
            .generate_text(
                call_ctx,
                model,
                Some(self.default_model.clone()),
                vec![ChatMessage { role: "user".to_string(), content: task.input.description.clone() }],
                None,
                CancellationToken::new(),
            )
            .await
            .map_err(|err| AgentError::new(err.to_string()))?;

        Ok(serde_json::json!({ "text": response.text }))
    }

    async fn synthesize(&self, ctx: SynthesisContext) -> Result<String, AgentError> {
        let pieces: Vec<String> = ctx
            .tasks
            .iter()
            .filter_map(|task| task.output.as_ref())
            .filter_map(|output| output.get("text").and_then(|v| v.as_str()))
            .map(str::to_string)
            .collect();
        if pieces.is_empty() {
            return Err(AgentError::new("no task produced output to synthesize from"));
        }
        Ok(pieces.join("\n"))
    }
}
