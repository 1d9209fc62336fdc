use thiserror::Error;

/// Provider error taxonomy (spec §7), with a `retryable` flag attached at
/// construction so callers never have to special-case codes to decide
/// whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderErrorCode {
    AuthFailed,
    RateLimited,
    ModelNotAllowed,
    ProviderNotConnected,
    InvalidProviderSelection,
    ProviderUnavailable,
    ValidationError,
    InternalError,
}

impl ProviderErrorCode {
    pub fn is_retryable_by_default(self) -> bool {
        matches!(
            self,
            ProviderErrorCode::RateLimited | ProviderErrorCode::ProviderUnavailable
        )
    }
}

#[derive(Debug, Error)]
#[error("{code:?}: {message}")]
pub struct ProviderError {
    pub code: ProviderErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        let retryable = code.is_retryable_by_default();
        Self {
            code,
            message: message.into(),
            retryable,
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Budget(#[from] waypoint_budget::BudgetError),
    #[error(transparent)]
    Ledger(#[from] waypoint_budget::LedgerError),
}
