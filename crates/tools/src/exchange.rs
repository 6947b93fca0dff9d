//! The interactive tool-result exchange.
//!
//! In a human-facing run the engine does not execute tools itself: it parks
//! on the exchange and an external actor (the client UI, a remote process)
//! delivers the result keyed by tool-call id. The wait is a race between the
//! delivery channel and a fixed timer; hitting the timer produces a
//! retryable error because the external actor may simply have been slow.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stepchain_core::error::{ChainError, ErrorCode};
use stepchain_core::tool::ToolResult;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

/// How long to wait for an externally-delivered tool result.
pub const TOOL_RESULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

enum Slot {
    /// A waiter is parked; deliver through this sender.
    Waiting(oneshot::Sender<ToolResult>),
    /// The result arrived before anyone waited.
    Ready(ToolResult),
}

/// Pub/sub-style rendezvous for tool results, keyed by tool-call id.
///
/// Delivery before wait and wait before delivery both work; each call id is
/// answered at most once.
#[derive(Clone)]
pub struct ToolExchange {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    timeout: Duration,
}

// A derived Default would zero the timeout; every construction path must
// carry the standard bound.
impl Default for ToolExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolExchange {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            timeout: TOOL_RESULT_TIMEOUT,
        }
    }

    /// Override the wait timeout. Test hook.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deliver a result for a tool call. Returns `false` when nothing was
    /// waiting and the slot was already occupied (duplicate delivery).
    pub async fn deliver(&self, result: ToolResult) -> bool {
        let mut slots = self.slots.lock().await;
        match slots.remove(&result.tool_call_id) {
            Some(Slot::Waiting(tx)) => {
                let id = result.tool_call_id.clone();
                if tx.send(result).is_err() {
                    warn!(tool_call_id = %id, "waiter dropped before delivery");
                }
                true
            }
            Some(Slot::Ready(existing)) => {
                // Duplicate delivery; keep the first result.
                warn!(tool_call_id = %result.tool_call_id, "duplicate tool result ignored");
                slots.insert(existing.tool_call_id.clone(), Slot::Ready(existing));
                false
            }
            None => {
                debug!(tool_call_id = %result.tool_call_id, "buffering early tool result");
                slots.insert(result.tool_call_id.clone(), Slot::Ready(result));
                true
            }
        }
    }

    /// Wait for the result of one tool call, bounded by the exchange timeout.
    pub async fn wait(&self, tool_call_id: &str) -> Result<ToolResult, ChainError> {
        let rx = {
            let mut slots = self.slots.lock().await;
            match slots.remove(tool_call_id) {
                Some(Slot::Ready(result)) => return Ok(result),
                Some(Slot::Waiting(_)) | None => {
                    let (tx, rx) = oneshot::channel();
                    slots.insert(tool_call_id.to_string(), Slot::Waiting(tx));
                    rx
                }
            }
        };

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(ChainError::new(
                ErrorCode::ToolResultTimeout,
                format!("tool result channel closed for call {tool_call_id}"),
            )),
            Err(_) => {
                // Clean up the abandoned waiter slot.
                self.slots.lock().await.remove(tool_call_id);
                Err(ChainError::new(
                    ErrorCode::ToolResultTimeout,
                    format!(
                        "no result delivered for call {tool_call_id} within {}s",
                        self.timeout.as_secs()
                    ),
                ))
            }
        }
    }
}
