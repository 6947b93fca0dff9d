//! Response cache — memoizes deterministic provider calls.
//!
//! A call is memoizable when the config's temperature is absent or exactly
//! zero. The key hashes the semantic content of the conversation plus the
//! config; message ids and timestamps are excluded so two runs producing the
//! same text hash identically. Every store operation is best-effort: a
//! failure disables memoization for that call and nothing else.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use stepchain_core::cache::CacheStore;
use stepchain_core::config::ChainConfig;
use stepchain_core::message::Conversation;
use stepchain_core::provider::{ProviderReply, Usage};
use tracing::{debug, warn};

/// Whether calls with this config should be memoized.
pub fn should_cache(config: &ChainConfig) -> bool {
    config.is_deterministic()
}

/// Compute the cache key for a conversation + config pair.
///
/// Hashes a canonical projection of each message (role, content, tool calls,
/// tool_call_id) so per-run identifiers do not defeat the cache.
pub fn cache_key(conversation: &Conversation, config: &ChainConfig) -> String {
    let canonical_messages: Vec<serde_json::Value> = conversation
        .messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": m.role,
                "content": m.content,
                "tool_calls": m.tool_calls,
                "tool_call_id": m.tool_call_id,
            })
        })
        .collect();

    let payload = serde_json::json!({
        "messages": canonical_messages,
        "config": config,
    });

    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    format!("response:{:x}", hasher.finalize())
}

/// Memoization layer over the cache store.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Look up a memoized reply.
    ///
    /// Returns `None` on miss, on a corrupt entry, and on store failure —
    /// all three are indistinguishable to the caller by design. A hit comes
    /// back with zeroed usage: replays cost nothing.
    pub async fn get(&self, conversation: &Conversation, config: &ChainConfig) -> Option<ProviderReply> {
        let key = cache_key(conversation, config);
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "response cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str::<ProviderReply>(&raw) {
            Ok(mut reply) => {
                reply.usage = Usage::zeroed();
                debug!(key = %key, "response cache hit");
                Some(reply)
            }
            Err(e) => {
                warn!(error = %e, "corrupt response cache entry, treating as miss");
                None
            }
        }
    }

    /// Memoize a reply. Provider-call identifiers are stripped before the
    /// write so replays cannot be confused with live calls.
    pub async fn set(
        &self,
        conversation: &Conversation,
        config: &ChainConfig,
        reply: &ProviderReply,
    ) {
        let mut cleaned = reply.clone();
        cleaned.provider_call_id = None;

        let raw = match serde_json::to_string(&cleaned) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "failed to serialize reply for cache");
                return;
            }
        };

        let key = cache_key(conversation, config);
        if let Err(e) = self.store.set(&key, raw).await {
            warn!(error = %e, "response cache write failed");
        }
    }
}
