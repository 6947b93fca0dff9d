//! Provider gateway contract — the abstraction over LLM backends.
//!
//! The gateway is an external collaborator: given a conversation, a config,
//! and tool definitions, it returns a stream of raw deltas plus a final
//! reply. The engine consumes the stream to completion, then awaits the
//! reply; it never speaks a provider wire protocol itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::ChainConfig;
use crate::message::{Conversation, MessageToolCall};

/// A tool definition sent to the provider so the model knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// One validated request to the gateway.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// The conversation to send
    pub conversation: Conversation,

    /// The step's merged config
    pub config: ChainConfig,

    /// Tools the model may call this step
    pub tools: Vec<ToolDefinition>,
}

/// A raw streaming delta from the provider, forwarded to consumers untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderDelta {
    /// Partial text content, if this delta carries any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Provider-specific payload passed through verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Token usage for one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Usage reported for cache replays: nothing was spent.
    pub fn zeroed() -> Self {
        Self::default()
    }

    /// Add another call's usage into this running total.
    pub fn accumulate(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    #[serde(untagged)]
    Other(String),
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::Stop => write!(f, "stop"),
            FinishReason::Length => write!(f, "length"),
            FinishReason::ToolCalls => write!(f, "tool_calls"),
            FinishReason::ContentFilter => write!(f, "content_filter"),
            FinishReason::Error => write!(f, "error"),
            FinishReason::Other(s) => write!(f, "{s}"),
        }
    }
}

/// The final, fully-assembled reply for one provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderReply {
    /// Final text, when the output type is text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Final structured object, when an output schema was configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<serde_json::Value>,

    /// Tool calls the model requested
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// Token usage for this call
    #[serde(default)]
    pub usage: Usage,

    /// Why generation stopped
    pub finish_reason: FinishReason,

    /// Provider-side call identifier; stripped before caching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_call_id: Option<String>,
}

impl ProviderReply {
    /// The reply's textual content, empty when none.
    pub fn text_content(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

/// An in-flight gateway call: a stream of raw deltas plus a receiver for the
/// final reply. The deltas channel closes before the reply resolves.
pub struct GatewayCall {
    /// Raw provider deltas, forwarded to the event stream as they arrive
    pub deltas: mpsc::Receiver<ProviderDelta>,

    /// The final assembled reply (or the failure that ended the call)
    pub reply: oneshot::Receiver<Result<ProviderReply, ProviderFailure>>,
}

/// Failures at the gateway boundary, before reclassification into the
/// chain error taxonomy.
#[derive(Debug, Clone, Error)]
pub enum ProviderFailure {
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider quota exhausted: {0}")]
    QuotaExceeded(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("provider call timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
}

/// The gateway trait every LLM backend implements.
///
/// The step driver calls `call()` without knowing which provider is behind
/// it. Errors must be translated into the taxonomy at the driver boundary.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// A human-readable name for this gateway (e.g. "openai", "anthropic").
    fn name(&self) -> &str;

    /// Start a provider call for the given request.
    async fn call(&self, request: GatewayRequest) -> Result<GatewayCall, ProviderFailure>;
}

/// A named gateway plus workspace-level flags.
#[derive(Clone)]
pub struct ProviderHandle {
    /// The gateway implementation
    pub gateway: Arc<dyn ProviderGateway>,

    /// Whether this is the workspace default provider; quota failures on the
    /// default provider get their own error code
    pub is_default: bool,
}

/// The caller-supplied map of provider name → gateway.
#[derive(Clone, Default)]
pub struct ProviderMap {
    providers: HashMap<String, ProviderHandle>,
}

impl ProviderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gateway under a name.
    pub fn insert(&mut self, name: impl Into<String>, gateway: Arc<dyn ProviderGateway>) {
        self.providers.insert(
            name.into(),
            ProviderHandle {
                gateway,
                is_default: false,
            },
        );
    }

    /// Register the workspace default gateway under a name.
    pub fn insert_default(&mut self, name: impl Into<String>, gateway: Arc<dyn ProviderGateway>) {
        self.providers.insert(
            name.into(),
            ProviderHandle {
                gateway,
                is_default: true,
            },
        );
    }

    /// Look up a gateway by name.
    pub fn get(&self, name: &str) -> Option<&ProviderHandle> {
        self.providers.get(name)
    }
}
