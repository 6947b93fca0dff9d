//! Chain execution events.
//!
//! Produced only by the step driver, consumed by exactly one reader per run.
//! For a run with N steps and no tool calls the sequence is:
//!
//! `chain_started, (step_started, provider_started, provider_raw*,
//! provider_completed, step_completed) × N, chain_completed`
//!
//! A run ends with exactly one of `chain_completed`, `tools_requested`
//! (paused), or `chain_error`.

use serde::{Deserialize, Serialize};
use stepchain_core::config::ChainConfig;
use stepchain_core::error::ChainError;
use stepchain_core::message::Message;
use stepchain_core::provider::{FinishReason, ProviderDelta, ProviderReply, Usage};
use stepchain_core::tool::ToolCall;

/// Events emitted over a run's event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
    /// The run has started.
    ChainStarted,

    /// A new step is beginning.
    StepStarted,

    /// The provider call for the current step is starting. `messages` holds
    /// only the messages the consumer has not seen yet — on a resumed run
    /// the first occurrence reports just the truly new ones.
    ProviderStarted {
        config: ChainConfig,
        messages: Vec<Message>,
    },

    /// A raw provider delta, passed through verbatim.
    ProviderRaw { delta: ProviderDelta },

    /// The provider call finished.
    ProviderCompleted {
        response: ProviderReply,
        token_usage: Usage,
        finish_reason: FinishReason,
    },

    /// The current step finished.
    StepCompleted,

    /// The run paused: these tool calls need external resolution.
    ToolsRequested { tools: Vec<ToolCall> },

    /// The chain ran to completion.
    ChainCompleted {
        finish_reason: FinishReason,
        token_usage: Usage,
    },

    /// The run failed terminally.
    ChainError { error: ChainError },
}

impl ChainEvent {
    /// Wire name of this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ChainStarted => "chain_started",
            Self::StepStarted => "step_started",
            Self::ProviderStarted { .. } => "provider_started",
            Self::ProviderRaw { .. } => "provider_raw",
            Self::ProviderCompleted { .. } => "provider_completed",
            Self::StepCompleted => "step_completed",
            Self::ToolsRequested { .. } => "tools_requested",
            Self::ChainCompleted { .. } => "chain_completed",
            Self::ChainError { .. } => "chain_error",
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ChainCompleted { .. } | Self::ToolsRequested { .. } | Self::ChainError { .. }
        )
    }
}
