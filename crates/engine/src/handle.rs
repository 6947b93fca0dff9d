//! The caller-facing run handle.
//!
//! A run produces exactly one [`RunResult`], delivered once. The historical
//! API surface of four separate promises (messages, tool calls, error, last
//! response) is derived from that single result as thin projections over a
//! shared future, so every projection observes the same outcome.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::time::Duration;
use stepchain_core::error::ChainError;
use stepchain_core::message::Message;
use stepchain_core::provider::{FinishReason, ProviderReply, Usage};
use stepchain_core::tool::ToolCall;
use stepchain_protocol::stream::EventStream;
use tokio::sync::oneshot;

/// How a single invocation of the step driver ended.
///
/// Paused is a sanctioned terminal state for the invocation, not a crash:
/// the run can be picked up again through `resume`.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The chain ran to completion.
    Completed {
        messages: Vec<Message>,
        finish_reason: FinishReason,
        token_usage: Usage,
    },

    /// The run paused on tool calls that need external resolution.
    Paused { tools: Vec<ToolCall> },

    /// The run failed terminally.
    Failed { error: ChainError },

    /// The abort signal fired; `messages` is the snapshot at that moment.
    Aborted { messages: Vec<Message> },
}

/// The single tagged result of one driver invocation.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// How the invocation ended
    pub outcome: RunOutcome,

    /// The last provider reply observed, if any
    pub last_response: Option<ProviderReply>,

    /// Wall-clock duration of the invocation
    pub duration: Duration,
}

type SharedResult = Shared<BoxFuture<'static, Option<RunResult>>>;

/// Handle to a running (or finished) chain invocation.
pub struct RunHandle {
    /// The ordered event stream for this run. Single consumer.
    pub events: EventStream,

    result: SharedResult,
}

impl RunHandle {
    pub(crate) fn new(events: EventStream, result_rx: oneshot::Receiver<RunResult>) -> Self {
        let result: SharedResult = async move { result_rx.await.ok() }.boxed().shared();
        Self { events, result }
    }

    /// The full tagged result. `None` only if the driver task died without
    /// reporting, which projections treat like an abort.
    pub async fn result(&self) -> Option<RunResult> {
        self.result.clone().await
    }

    /// Final messages: the completed message log, or the snapshot on abort.
    /// `None` while paused or failed.
    pub async fn final_messages(&self) -> Option<Vec<Message>> {
        match self.result().await?.outcome {
            RunOutcome::Completed { messages, .. } | RunOutcome::Aborted { messages } => {
                Some(messages)
            }
            RunOutcome::Paused { .. } | RunOutcome::Failed { .. } => None,
        }
    }

    /// Tool calls awaiting external resolution; empty unless paused.
    pub async fn tool_calls(&self) -> Vec<ToolCall> {
        match self.result().await.map(|r| r.outcome) {
            Some(RunOutcome::Paused { tools }) => tools,
            _ => Vec::new(),
        }
    }

    /// The terminal error; `None` for every other outcome, including abort.
    pub async fn error(&self) -> Option<ChainError> {
        match self.result().await?.outcome {
            RunOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// The last provider reply observed before the run ended.
    pub async fn last_response(&self) -> Option<ProviderReply> {
        self.result().await?.last_response
    }

    /// Wall-clock duration of the invocation.
    pub async fn duration(&self) -> Duration {
        self.result()
            .await
            .map(|r| r.duration)
            .unwrap_or_default()
    }
}
