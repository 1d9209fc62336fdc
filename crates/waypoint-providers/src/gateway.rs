use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use waypoint_budget::{BudgetPolicy, CostEvent, CostLedger, PricingResolver, Usage};
use waypoint_types::{ModelSpec, Phase, RunId, SessionId, TaskId};

use crate::error::{GatewayError, ProviderError, ProviderErrorCode};
use crate::ports::{
    AIService, GenerateStructuredRequest, GenerateStructuredResponse, GenerateTextRequest,
    GenerateTextResponse, ProviderCapabilityResolver, StreamChunk, TokenUsage,
};

/// Identifies the call for cost accounting and idempotency. One of these is
/// built per gateway call by the caller (typically the `AgentTaskExecutor`
/// or `RunEngine` planning/synthesis step).
#[derive(Debug, Clone)]
pub struct GatewayCallContext {
    pub run_id: RunId,
    pub session_id: SessionId,
    pub task_id: Option<TaskId>,
    pub agent_type: String,
    pub phase: Phase,
    pub idempotency_key: String,
}

/// Sole allowed path for model invocation. Wraps an `AIService` with
/// capability gating, budget enforcement, and cost-ledger accounting so no
/// caller can reach a provider without going through all three.
pub struct LLMGateway {
    ai_service: Arc<dyn AIService>,
    capability_resolver: Arc<dyn ProviderCapabilityResolver>,
    budget_policy: Arc<BudgetPolicy>,
    cost_ledger: Arc<CostLedger>,
    pricing_resolver: PricingResolver,
    gateway_default_model: Option<ModelSpec>,
}

impl LLMGateway {
    pub fn new(
        ai_service: Arc<dyn AIService>,
        capability_resolver: Arc<dyn ProviderCapabilityResolver>,
        budget_policy: Arc<BudgetPolicy>,
        cost_ledger: Arc<CostLedger>,
        pricing_resolver: PricingResolver,
        gateway_default_model: Option<ModelSpec>,
    ) -> Self {
        Self {
            ai_service,
            capability_resolver,
            budget_policy,
            cost_ledger,
            pricing_resolver,
            gateway_default_model,
        }
    }

    /// Caller-supplied model wins, then the agent's own default, then the
    /// gateway-wide default. Never substitutes a silent fallback beyond
    /// that chain — if none resolve, the call fails closed.
    fn resolve_model(
        &self,
        caller_model: Option<ModelSpec>,
        agent_default_model: Option<ModelSpec>,
    ) -> Result<ModelSpec, ProviderError> {
        caller_model
            .or(agent_default_model)
            .or_else(|| self.gateway_default_model.clone())
            .ok_or_else(|| {
                ProviderError::new(
                    ProviderErrorCode::InvalidProviderSelection,
                    "no provider/model resolved from caller, agent default, or gateway default",
                )
            })
    }

    async fn gate(
        &self,
        model: &ModelSpec,
        ctx: &GatewayCallContext,
        estimated_usage: &Usage,
    ) -> Result<(), GatewayError> {
        let capabilities = self
            .capability_resolver
            .get_capabilities(&model.provider_id)
            .await
            .map_err(|_| {
                ProviderError::new(
                    ProviderErrorCode::InvalidProviderSelection,
                    format!("no capabilities registered for provider {}", model.provider_id),
                )
            })?;
        let _ = capabilities; // presence alone satisfies the gate; callers needing
                              // a specific capability check it themselves.

        let allowed = self
            .capability_resolver
            .is_model_allowed(&model.provider_id, &model.model_id)
            .await?;
        if !allowed {
            return Err(GatewayError::Provider(ProviderError::new(
                ProviderErrorCode::ModelNotAllowed,
                format!("model {} is not allowed for provider {}", model.model_id, model.provider_id),
            )));
        }

        let planned = self
            .pricing_resolver
            .resolve(&model.provider_id, &model.model_id, estimated_usage)
            .calculated_cost_usd;
        self.budget_policy
            .preflight(&ctx.run_id, &ctx.session_id, planned)
            .await?;
        Ok(())
    }

    async fn record(
        &self,
        model: &ModelSpec,
        ctx: &GatewayCallContext,
        usage: &TokenUsage,
    ) -> Result<(), GatewayError> {
        Self::record_usage(&self.cost_ledger, &self.budget_policy, &self.pricing_resolver, model, ctx, usage).await
    }

    /// Shared post-commit path for every call style: ledger append, then
    /// the budget policy's running-total update. Free of `&self` so the
    /// streamed call can drive it from the `Done` frame's finish handler,
    /// after the gateway method itself has already returned the stream.
    async fn record_usage(
        cost_ledger: &CostLedger,
        budget_policy: &BudgetPolicy,
        pricing_resolver: &PricingResolver,
        model: &ModelSpec,
        ctx: &GatewayCallContext,
        usage: &TokenUsage,
    ) -> Result<(), GatewayError> {
        let resolved = pricing_resolver.resolve(
            &model.provider_id,
            &model.model_id,
            &Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
                provider_cost_usd: usage.provider_cost_usd,
                litellm_response_cost_usd: usage.litellm_response_cost_usd,
            },
        );

        let event = CostEvent {
            event_id: waypoint_types::EventId::new().to_string(),
            idempotency_key: ctx.idempotency_key.clone(),
            run_id: ctx.run_id.clone(),
            session_id: ctx.session_id.clone(),
            task_id: ctx.task_id.clone(),
            agent_type: ctx.agent_type.clone(),
            phase: ctx.phase,
            provider: model.provider_id.clone(),
            model: model.model_id.clone(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            provider_cost_usd: usage.provider_cost_usd,
            calculated_cost_usd: resolved.calculated_cost_usd,
            pricing_source: resolved.pricing_source,
            created_at: chrono::Utc::now(),
        };

        cost_ledger.append(event).await?;
        budget_policy
            .post_commit(&ctx.session_id, resolved.calculated_cost_usd)
            .await?;
        Ok(())
    }

    pub async fn generate_text(
        &self,
        ctx: GatewayCallContext,
        caller_model: Option<ModelSpec>,
        agent_default_model: Option<ModelSpec>,
        messages: Vec<crate::ports::ChatMessage>,
        max_tokens: Option<u32>,
        cancellation: tokio_util::sync::CancellationToken,
    ) -> Result<GenerateTextResponse, GatewayError> {
        let model = self.resolve_model(caller_model, agent_default_model)?;

        let estimated_prompt_tokens: u64 = messages
            .iter()
            .map(|m| (m.content.chars().count() as u64 + 3) / 4)
            .sum();
        let estimated_usage = Usage {
            prompt_tokens: estimated_prompt_tokens,
            completion_tokens: max_tokens.unwrap_or(512) as u64,
            total_tokens: estimated_prompt_tokens + max_tokens.unwrap_or(512) as u64,
            ..Default::default()
        };
        self.gate(&model, &ctx, &estimated_usage).await?;

        let req = GenerateTextRequest {
            model: model.clone(),
            messages,
            max_tokens,
            cancellation,
        };
        let response = self.ai_service.generate_text(req).await?;
        self.record(&model, &ctx, &response.usage).await?;
        Ok(response)
    }

    pub async fn generate_structured(
        &self,
        ctx: GatewayCallContext,
        caller_model: Option<ModelSpec>,
        agent_default_model: Option<ModelSpec>,
        messages: Vec<crate::ports::ChatMessage>,
        schema: serde_json::Value,
        cancellation: tokio_util::sync::CancellationToken,
    ) -> Result<GenerateStructuredResponse, GatewayError> {
        let model = self.resolve_model(caller_model, agent_default_model)?;

        let estimated_prompt_tokens: u64 = messages
            .iter()
            .map(|m| (m.content.chars().count() as u64 + 3) / 4)
            .sum();
        let estimated_usage = Usage {
            prompt_tokens: estimated_prompt_tokens,
            completion_tokens: 512,
            total_tokens: estimated_prompt_tokens + 512,
            ..Default::default()
        };
        self.gate(&model, &ctx, &estimated_usage).await?;

        let req = GenerateStructuredRequest {
            model: model.clone(),
            messages,
            schema,
            cancellation,
        };
        let response = self.ai_service.generate_structured(req).await?;
        self.record(&model, &ctx, &response.usage).await?;
        Ok(response)
    }

    /// Same capability-gate/budget-preflight wrapping as `generate_text`,
    /// but the post-commit can't happen until the stream actually finishes,
    /// so it's deferred to the `Done` frame instead of running right after
    /// the call returns. The preflight still runs eagerly off a token
    /// estimate, same as the non-streaming calls.
    pub async fn generate_stream(
        &self,
        ctx: GatewayCallContext,
        caller_model: Option<ModelSpec>,
        agent_default_model: Option<ModelSpec>,
        messages: Vec<crate::ports::ChatMessage>,
        max_tokens: Option<u32>,
        cancellation: tokio_util::sync::CancellationToken,
    ) -> Result<BoxStream<'static, StreamChunk>, GatewayError> {
        let model = self.resolve_model(caller_model, agent_default_model)?;

        let estimated_prompt_tokens: u64 = messages
            .iter()
            .map(|m| (m.content.chars().count() as u64 + 3) / 4)
            .sum();
        let estimated_usage = Usage {
            prompt_tokens: estimated_prompt_tokens,
            completion_tokens: max_tokens.unwrap_or(512) as u64,
            total_tokens: estimated_prompt_tokens + max_tokens.unwrap_or(512) as u64,
            ..Default::default()
        };
        self.gate(&model, &ctx, &estimated_usage).await?;

        let req = GenerateTextRequest {
            model: model.clone(),
            messages,
            max_tokens,
            cancellation,
        };
        let inner = self.ai_service.create_chat_stream(req).await?;

        let cost_ledger = self.cost_ledger.clone();
        let budget_policy = self.budget_policy.clone();
        let pricing_resolver = self.pricing_resolver.clone();

        let wrapped = stream::unfold((inner, model, ctx), move |(mut inner, model, ctx)| {
            let cost_ledger = cost_ledger.clone();
            let budget_policy = budget_policy.clone();
            let pricing_resolver = pricing_resolver.clone();
            async move {
                let chunk = inner.next().await?;
                if let StreamChunk::Done { usage, .. } = &chunk {
                    if let Err(err) =
                        Self::record_usage(&cost_ledger, &budget_policy, &pricing_resolver, &model, &ctx, usage).await
                    {
                        tracing::warn!(error = %err, "failed to record streamed call cost");
                    }
                }
                Some((chunk, (inner, model, ctx)))
            }
        });

        Ok(Box::pin(wrapped))
    }
}
