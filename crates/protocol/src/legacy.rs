//! Legacy event-format adapter.
//!
//! Older consumers speak a flatter event shape (`chain-step`,
//! `provider-event`, `chain-step-complete`, …). The adapter re-emits the
//! current stream in that shape, with three obligations:
//!
//! 1. provider-raw deltas pass through untouched,
//! 2. messages the client already holds are sliced out of each `chain-step`
//!    via a running message-count cursor (resume support),
//! 3. the single final-response promise resolves exactly once, at chain
//!    completion.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use serde::{Deserialize, Serialize};
use stepchain_core::config::ChainConfig;
use stepchain_core::error::ChainError;
use stepchain_core::message::Message;
use stepchain_core::provider::{FinishReason, ProviderDelta, ProviderReply, Usage};
use stepchain_core::tool::ToolCall;

use crate::event::ChainEvent;
use crate::stream::EventStream;

/// The older event shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum LegacyEvent {
    /// A step is starting; `messages` holds only messages the client does
    /// not already have, `message_count` the cumulative total it has after
    /// this event.
    ChainStep {
        messages: Vec<Message>,
        config: ChainConfig,
        message_count: usize,
    },

    /// Raw provider delta, untouched.
    ProviderEvent { delta: ProviderDelta },

    /// The provider call for the step finished.
    ChainStepComplete { response: ProviderReply },

    /// The run paused on unresolved tool calls.
    ToolsRequested { tools: Vec<ToolCall> },

    /// The chain completed.
    ChainComplete {
        finish_reason: FinishReason,
        token_usage: Usage,
    },

    /// The run failed.
    ChainError { error: ChainError },
}

/// A legacy-shaped run: the re-emitted events plus the one final-response
/// promise.
pub struct LegacyRun {
    /// Legacy events in stream order.
    pub events: mpsc::Receiver<LegacyEvent>,

    /// Resolves exactly once, with the last provider reply, when the chain
    /// completes. Dropped unresolved on pause or error.
    pub final_response: oneshot::Receiver<ProviderReply>,
}

/// Adapt a run's event stream to the legacy shape.
///
/// `client_message_count` is the number of messages the client already holds
/// relative to what THIS stream will report; that many messages are sliced
/// off the front of the cumulative message log before re-emission. A resumed
/// run's stream is already cut down to the post-pause tail by the engine, so
/// resumed runs must pass 0 here; passing the client's held count as well
/// would suppress the new messages twice.
pub fn adapt(mut stream: EventStream, client_message_count: usize) -> LegacyRun {
    let (tx, rx) = mpsc::channel(64);
    let (final_tx, final_rx) = oneshot::channel();

    tokio::spawn(async move {
        // `absolute` tracks the run's full message log from position zero;
        // `seen` is how much of that log the client already holds.
        let mut seen = client_message_count;
        let mut absolute = 0usize;
        let mut last_response: Option<ProviderReply> = None;
        let mut final_tx = Some(final_tx);

        while let Some(event) = stream.next().await {
            let legacy = match event {
                ChainEvent::ChainStarted | ChainEvent::StepCompleted => continue,
                // Messages and config arrive with the provider_started
                // event; nothing to re-emit for the bare step marker.
                ChainEvent::StepStarted => continue,
                ChainEvent::ProviderStarted { config, messages } => {
                    absolute += messages.len();
                    let fresh: Vec<Message> = if seen < absolute {
                        let skip = messages.len() - (absolute - seen);
                        messages.into_iter().skip(skip).collect()
                    } else {
                        Vec::new()
                    };
                    seen = seen.max(absolute);
                    LegacyEvent::ChainStep {
                        messages: fresh,
                        config,
                        message_count: seen,
                    }
                }
                ChainEvent::ProviderRaw { delta } => LegacyEvent::ProviderEvent { delta },
                ChainEvent::ProviderCompleted { response, .. } => {
                    last_response = Some(response.clone());
                    // The assistant reply becomes one message the client now
                    // holds.
                    absolute += 1;
                    seen = seen.max(absolute);
                    LegacyEvent::ChainStepComplete { response }
                }
                ChainEvent::ToolsRequested { tools } => LegacyEvent::ToolsRequested { tools },
                ChainEvent::ChainCompleted {
                    finish_reason,
                    token_usage,
                } => {
                    if let (Some(tx), Some(response)) = (final_tx.take(), last_response.clone()) {
                        let _ = tx.send(response);
                    }
                    LegacyEvent::ChainComplete {
                        finish_reason,
                        token_usage,
                    }
                }
                ChainEvent::ChainError { error } => LegacyEvent::ChainError { error },
            };

            if tx.send(legacy).await.is_err() {
                debug!("legacy consumer gone, stopping adapter");
                break;
            }
        }
    });

    LegacyRun {
        events: rx,
        final_response: final_rx,
    }
}
