//! `AIService`/`ProviderCapabilityResolver` ports and the `LLMGateway` that
//! wraps them with capability gating, budget preflight, and cost-ledger
//! accounting (spec §4.4). Speaking an actual provider wire protocol is out
//! of scope here by design (spec §1 Non-goals) — implementers of
//! `AIService` own that; this crate ships a couple of deterministic test
//! doubles for the demo binary and the test suite, not a real HTTP client.

pub mod error;
pub mod gateway;
pub mod ports;
pub mod testing;

pub use error::{GatewayError, ProviderError, ProviderErrorCode};
pub use gateway::{GatewayCallContext, LLMGateway};
pub use ports::{
    AIService, ChatMessage, GenerateStructuredRequest, GenerateStructuredResponse,
    GenerateTextRequest, GenerateTextResponse, ProviderCapabilities, ProviderCapabilityResolver,
    ProviderHealth, StreamChunk, TokenUsage,
};
