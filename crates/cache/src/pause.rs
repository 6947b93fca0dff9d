//! Pause cache — persists a paused chain cursor so the run can resume later,
//! possibly in a different process.
//!
//! An entry holds the serialized cursor plus the provider reply whose tool
//! calls are still unanswered. Writes are best-effort: losing an entry only
//! prevents resumption, it does not corrupt anything, so failures are logged
//! and swallowed. There is at most one live entry per run id; the engine
//! deletes it when the chain completes.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use stepchain_core::cache::CacheStore;
use stepchain_core::chain::Chain;
use stepchain_core::provider::ProviderReply;
use tracing::{debug, warn};
use uuid::Uuid;

/// The persisted shape of a paused run.
#[derive(Debug, Serialize, Deserialize)]
struct CachedChainEntry {
    /// base64 of `Chain::serialize`
    chain: String,

    /// The reply whose tool calls are awaiting external results
    pending_response: ProviderReply,
}

/// A reconstructed paused run.
#[derive(Debug)]
pub struct CachedChain {
    /// The deserialized cursor, ready to step again
    pub chain: Chain,

    /// The reply captured at pause time
    pub pending_response: ProviderReply,
}

fn pause_key(run_id: Uuid) -> String {
    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    format!("paused:{:x}", hasher.finalize())
}

/// Pause/resume persistence over the cache store.
#[derive(Clone)]
pub struct PauseCache {
    store: Arc<dyn CacheStore>,
}

impl PauseCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Persist a paused chain. Best-effort.
    pub async fn cache_chain(&self, run_id: Uuid, chain: &Chain, pending_response: &ProviderReply) {
        let bytes = match chain.serialize() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "failed to serialize chain for pause cache");
                return;
            }
        };

        let entry = CachedChainEntry {
            chain: BASE64.encode(bytes),
            pending_response: pending_response.clone(),
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "failed to encode pause cache entry");
                return;
            }
        };

        match self.store.set(&pause_key(run_id), raw).await {
            Ok(()) => debug!(run_id = %run_id, "cached paused chain"),
            Err(e) => warn!(run_id = %run_id, error = %e, "pause cache write failed"),
        }
    }

    /// Load a paused chain. `None` when missing or corrupt — a corrupt entry
    /// is unrecoverable anyway, so it is treated exactly like a miss.
    pub async fn get_cached_chain(&self, run_id: Uuid) -> Option<CachedChain> {
        let raw = match self.store.get(&pause_key(run_id)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "pause cache read failed");
                return None;
            }
        };

        let entry: CachedChainEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "corrupt pause cache entry");
                return None;
            }
        };

        let bytes = match BASE64.decode(&entry.chain) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "corrupt chain payload in pause cache");
                return None;
            }
        };

        match Chain::deserialize(&bytes) {
            Ok(chain) => Some(CachedChain {
                chain,
                pending_response: entry.pending_response,
            }),
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "failed to restore chain from pause cache");
                None
            }
        }
    }

    /// Drop the entry for a completed run. Called exactly once, when the
    /// chain reaches completion.
    pub async fn delete_cached_chain(&self, run_id: Uuid) {
        if let Err(e) = self.store.del(&pause_key(run_id)).await {
            warn!(run_id = %run_id, error = %e, "pause cache delete failed");
        }
    }

    /// Whether an entry exists for the run. Test helper.
    pub async fn has_entry(&self, run_id: Uuid) -> bool {
        matches!(self.store.get(&pause_key(run_id)).await, Ok(Some(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryStore;
    use stepchain_core::chain::{CompiledPrompt, StepBlueprint};
    use stepchain_core::config::ChainConfig;
    use stepchain_core::message::{Message, MessageToolCall};
    use stepchain_core::provider::{FinishReason, Usage};

    fn paused_reply() -> ProviderReply {
        ProviderReply {
            text: None,
            object: None,
            tool_calls: vec![MessageToolCall {
                id: "call_1".into(),
                name: "get_weather".into(),
                arguments: serde_json::json!({"city": "NYC"}),
            }],
            usage: Usage::default(),
            finish_reason: FinishReason::ToolCalls,
            provider_call_id: None,
        }
    }

    fn one_step_chain() -> Chain {
        let mut chain = Chain::new(CompiledPrompt {
            steps: vec![
                StepBlueprint {
                    messages: vec![Message::user("what's the weather?")],
                    config: ChainConfig::default(),
                },
                StepBlueprint::default(),
            ],
            config: ChainConfig::default(),
        })
        .unwrap();
        chain.step(&[]).unwrap();
        chain
    }

    #[tokio::test]
    async fn cache_and_restore_roundtrip() {
        let cache = PauseCache::new(Arc::new(InMemoryStore::new()));
        let run_id = Uuid::new_v4();
        let chain = one_step_chain();

        cache.cache_chain(run_id, &chain, &paused_reply()).await;
        assert!(cache.has_entry(run_id).await);

        let restored = cache.get_cached_chain(run_id).await.unwrap();
        assert_eq!(restored.chain.message_count(), chain.message_count());
        assert_eq!(restored.pending_response.tool_calls.len(), 1);
        assert_eq!(restored.pending_response.tool_calls[0].name, "get_weather");
    }

    #[tokio::test]
    async fn missing_entry_is_none_not_error() {
        let cache = PauseCache::new(Arc::new(InMemoryStore::new()));
        assert!(cache.get_cached_chain(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn corrupt_entry_is_none() {
        let store = Arc::new(InMemoryStore::new());
        let run_id = Uuid::new_v4();
        store
            .set(&pause_key(run_id), "garbage".into())
            .await
            .unwrap();

        let cache = PauseCache::new(store);
        assert!(cache.get_cached_chain(run_id).await.is_none());
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let cache = PauseCache::new(Arc::new(InMemoryStore::new()));
        let run_id = Uuid::new_v4();

        cache
            .cache_chain(run_id, &one_step_chain(), &paused_reply())
            .await;
        cache.delete_cached_chain(run_id).await;
        assert!(!cache.has_entry(run_id).await);
    }

    #[tokio::test]
    async fn distinct_runs_get_distinct_keys() {
        let cache = PauseCache::new(Arc::new(InMemoryStore::new()));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        cache.cache_chain(a, &one_step_chain(), &paused_reply()).await;
        assert!(cache.get_cached_chain(a).await.is_some());
        assert!(cache.get_cached_chain(b).await.is_none());
    }
}
