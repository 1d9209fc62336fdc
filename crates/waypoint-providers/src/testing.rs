//! Deterministic test doubles. A provider with no native streaming support
//! can still satisfy a streaming port by wrapping a single non-streaming
//! call into a fake multi-chunk stream; the same trick turns
//! `EchoAiService::generate_text` into `create_chat_stream` here.

use std::collections::HashSet;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::{ProviderError, ProviderErrorCode};
use crate::ports::{
    AIService, ChatMessage, GenerateStructuredRequest, GenerateStructuredResponse,
    GenerateTextRequest, GenerateTextResponse, ProviderCapabilities, ProviderCapabilityResolver,
    ProviderHealth, StreamChunk, TokenUsage,
};

/// Echoes the last user message back with a fixed prefix, reporting a
/// token usage derived from input length. Exists so `waypoint-engine` and
/// integration tests have something to wire the gateway to without a real
/// network call.
pub struct EchoAiService {
    pub prefix: String,
}

impl Default for EchoAiService {
    fn default() -> Self {
        Self {
            prefix: "echo: ".to_string(),
        }
    }
}

fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64 + 3) / 4
}

#[async_trait]
impl AIService for EchoAiService {
    async fn generate_text(
        &self,
        req: GenerateTextRequest,
    ) -> Result<GenerateTextResponse, ProviderError> {
        let last_user = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let text = format!("{}{}", self.prefix, last_user);
        let prompt_tokens: u64 = req.messages.iter().map(|m| estimate_tokens(&m.content)).sum();
        let completion_tokens = estimate_tokens(&text);
        Ok(GenerateTextResponse {
            text,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
                ..Default::default()
            },
            provider_request_id: None,
        })
    }

    async fn generate_structured(
        &self,
        req: GenerateStructuredRequest,
    ) -> Result<GenerateStructuredResponse, ProviderError> {
        let prompt_tokens: u64 = req.messages.iter().map(|m| estimate_tokens(&m.content)).sum();
        Ok(GenerateStructuredResponse {
            object: req.schema,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens: 0,
                total_tokens: prompt_tokens,
                ..Default::default()
            },
            provider_request_id: None,
        })
    }

    async fn create_chat_stream(
        &self,
        req: GenerateTextRequest,
    ) -> Result<BoxStream<'static, StreamChunk>, ProviderError> {
        let response = self.generate_text(req).await?;
        let chunks = vec![
            StreamChunk::TextDelta(response.text),
            StreamChunk::Done {
                finish_reason: "stop".to_string(),
                usage: response.usage,
            },
        ];
        Ok(stream::iter(chunks).boxed())
    }

    async fn health_check(
        &self,
        _model: &waypoint_types::ModelSpec,
    ) -> Result<ProviderHealth, ProviderError> {
        Ok(ProviderHealth {
            available: true,
            detail: None,
        })
    }
}

/// Fixed allow-list capability resolver, for tests and the demo CLI.
pub struct StaticCapabilityResolver {
    known_providers: HashSet<String>,
    allowed_models: HashSet<(String, String)>,
}

impl StaticCapabilityResolver {
    pub fn new() -> Self {
        Self {
            known_providers: HashSet::new(),
            allowed_models: HashSet::new(),
        }
    }

    pub fn allow(mut self, provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        let provider_id = provider_id.into();
        self.known_providers.insert(provider_id.clone());
        self.allowed_models.insert((provider_id, model_id.into()));
        self
    }
}

impl Default for StaticCapabilityResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderCapabilityResolver for StaticCapabilityResolver {
    async fn get_capabilities(
        &self,
        provider_id: &str,
    ) -> Result<ProviderCapabilities, ProviderError> {
        if !self.known_providers.contains(provider_id) {
            return Err(ProviderError::new(
                ProviderErrorCode::ProviderNotConnected,
                format!("unknown provider {provider_id}"),
            ));
        }
        Ok(ProviderCapabilities {
            supports_streaming: true,
            supports_structured_output: true,
            supports_tools: false,
            max_context_tokens: Some(128_000),
        })
    }

    async fn is_model_allowed(
        &self,
        provider_id: &str,
        model_id: &str,
    ) -> Result<bool, ProviderError> {
        Ok(self
            .allowed_models
            .contains(&(provider_id.to_string(), model_id.to_string())))
    }
}
