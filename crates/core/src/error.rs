//! The chain error taxonomy.
//!
//! Every failure the engine can surface carries a stable [`ErrorCode`] so
//! persistence and callers can branch on it without parsing messages.
//! Uses `thiserror` for ergonomic error definitions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes for chain execution failures.
///
/// The set is non-exhaustive by design: new codes may be added as providers
/// grow new failure modes, and consumers must treat unknown codes as
/// [`ErrorCode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorCode {
    /// The referenced provider name is not present in the provider map.
    MissingProvider,
    /// The document/step configuration is invalid (bad tool reference,
    /// missing required field, non-agent document used as a sub-agent).
    DocumentConfigError,
    /// The compiled prompt could not be turned into a chain cursor, or a
    /// serialized cursor could not be restored.
    ChainCompileError,
    /// The provider configuration is structurally valid but rejected by the
    /// provider rules (e.g. unsupported parameter combination).
    AiProviderConfigError,
    /// The provider call itself failed at runtime.
    AiRunError,
    /// The provider rate-limited the call.
    RateLimit,
    /// The step loop hit its configured or absolute step ceiling.
    MaxStepCountExceeded,
    /// The workspace default provider ran out of quota.
    DefaultProviderExceededQuota,
    /// The configured response format is not one the engine understands.
    UnsupportedProviderResponseType,
    /// An externally-resolved tool result did not arrive in time.
    ToolResultTimeout,
    /// Anything we could not classify.
    Unknown,
}

impl ErrorCode {
    /// Whether a failure with this code is worth retrying as-is.
    ///
    /// Retryable failures are transient by nature; everything else is
    /// terminal for the current run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimit
                | ErrorCode::DefaultProviderExceededQuota
                | ErrorCode::ToolResultTimeout
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::MissingProvider => "missing_provider",
            ErrorCode::DocumentConfigError => "document_config_error",
            ErrorCode::ChainCompileError => "chain_compile_error",
            ErrorCode::AiProviderConfigError => "ai_provider_config_error",
            ErrorCode::AiRunError => "ai_run_error",
            ErrorCode::RateLimit => "rate_limit",
            ErrorCode::MaxStepCountExceeded => "max_step_count_exceeded",
            ErrorCode::DefaultProviderExceededQuota => "default_provider_exceeded_quota",
            ErrorCode::UnsupportedProviderResponseType => "unsupported_provider_response_type",
            ErrorCode::ToolResultTimeout => "tool_result_timeout",
            ErrorCode::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// A chain execution error: a stable code, a human-readable message, and
/// optional structured details for persistence.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ChainError {
    /// The stable error code.
    pub code: ErrorCode,

    /// Human-readable description of what went wrong.
    pub message: String,

    /// Optional structured context (provider payloads, offending config).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ChainError {
    /// Create an error with a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Whether this error is retryable (delegates to the code).
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, ChainError>;
