//! Resuming a paused run.
//!
//! A paused run left two things in the pause cache: the serialized chain
//! cursor and the provider reply whose tool calls were never answered. Resume
//! reconstructs the cursor, feeds the pending assistant message plus the
//! delivered tool results back into the step loop, and spawns a fresh driver
//! invocation under the same run id. The message log is byte-identical to
//! what an uninterrupted run would have produced.

use std::collections::HashSet;
use std::sync::Arc;

use stepchain_cache::{CachedChain, PauseCache};
use stepchain_core::tool::ToolResult;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::driver::{RunOptions, assistant_message, spawn_run};
use crate::handle::RunHandle;

/// Resume a paused run with externally-produced tool results.
///
/// Returns `None` when no pause entry exists for the run id — the run was
/// never paused, already completed, or the entry was lost. The entry stays
/// in the cache until the resumed invocation completes, so a crashed resume
/// can be retried.
pub async fn resume(
    run_id: Uuid,
    tool_results: Vec<ToolResult>,
    opts: RunOptions,
) -> Option<RunHandle> {
    let pause_cache = PauseCache::new(Arc::clone(&opts.store));
    let CachedChain {
        chain,
        pending_response,
    } = pause_cache.get_cached_chain(run_id).await?;

    let pending_ids: HashSet<&str> = pending_response
        .tool_calls
        .iter()
        .map(|c| c.id.as_str())
        .collect();
    for result in &tool_results {
        if !pending_ids.contains(result.tool_call_id.as_str()) {
            warn!(
                run_id = %run_id,
                tool_call_id = %result.tool_call_id,
                "tool result does not match any pending call"
            );
        }
    }
    debug!(
        run_id = %run_id,
        pending = pending_ids.len(),
        delivered = tool_results.len(),
        "resuming paused chain"
    );

    // The caller observed the whole transcript plus the pending assistant
    // reply before the pause; only the tool results and anything after them
    // are new to the event stream.
    let seen = chain.message_count() + 1;

    let mut feedback = Vec::with_capacity(tool_results.len() + 1);
    feedback.push(assistant_message(&pending_response));
    feedback.extend(tool_results.into_iter().map(ToolResult::into_message));

    Some(spawn_run(chain, opts.with_run_id(run_id), feedback, seen))
}
