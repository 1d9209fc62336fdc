use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use waypoint_types::ModelSpec;

use crate::error::ProviderError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub provider_cost_usd: Option<f64>,
    pub litellm_response_cost_usd: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct GenerateTextRequest {
    pub model: ModelSpec,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub cancellation: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct GenerateTextResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub provider_request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GenerateStructuredRequest {
    pub model: ModelSpec,
    pub messages: Vec<ChatMessage>,
    /// JSON Schema describing the expected shape; the port implementer is
    /// responsible for getting the underlying model to honor it.
    pub schema: Value,
    pub cancellation: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct GenerateStructuredResponse {
    pub object: Value,
    pub usage: TokenUsage,
    pub provider_request_id: Option<String>,
}

/// A chunk of a streamed completion. `Done` carries the same usage shape
/// the non-streaming calls report, since the gateway needs it for the
/// post-commit ledger append regardless of which call style produced it.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    TextDelta(String),
    ReasoningDelta(String),
    ToolCallStart { id: String, name: String },
    ToolCallDelta { id: String, arguments_delta: String },
    ToolCallEnd { id: String },
    Done { finish_reason: String, usage: TokenUsage },
}

#[derive(Debug, Clone, Default)]
pub struct ProviderHealth {
    pub available: bool,
    pub detail: Option<String>,
}

/// Thin wrapper over a model provider SDK. The core never speaks a wire
/// protocol directly; it calls this port.
#[async_trait]
pub trait AIService: Send + Sync {
    async fn generate_text(
        &self,
        req: GenerateTextRequest,
    ) -> Result<GenerateTextResponse, ProviderError>;

    async fn generate_structured(
        &self,
        req: GenerateStructuredRequest,
    ) -> Result<GenerateStructuredResponse, ProviderError>;

    async fn create_chat_stream(
        &self,
        req: GenerateTextRequest,
    ) -> Result<BoxStream<'static, StreamChunk>, ProviderError>;

    /// Cheap, side-effect-free capability probe; lets
    /// `ProviderCapabilityResolver` implementations learn what a provider
    /// currently supports without a full round trip.
    async fn health_check(&self, model: &ModelSpec) -> Result<ProviderHealth, ProviderError>;
}

#[derive(Debug, Clone, Default)]
pub struct ProviderCapabilities {
    pub supports_streaming: bool,
    pub supports_structured_output: bool,
    pub supports_tools: bool,
    pub max_context_tokens: Option<u64>,
}

#[async_trait]
pub trait ProviderCapabilityResolver: Send + Sync {
    async fn get_capabilities(
        &self,
        provider_id: &str,
    ) -> Result<ProviderCapabilities, ProviderError>;

    async fn is_model_allowed(
        &self,
        provider_id: &str,
        model_id: &str,
    ) -> Result<bool, ProviderError>;
}
