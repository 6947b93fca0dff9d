//! The cache-store contract.
//!
//! A deliberately small get/set/delete-by-key surface. Both the response
//! cache and the pause cache sit on top of it, and both treat every failure
//! as a miss: losing a cache entry only disables memoization or resumption,
//! it never corrupts a run.

use async_trait::async_trait;
use thiserror::Error;

/// A cache store operation failure. Callers log and swallow these.
#[derive(Debug, Clone, Error)]
#[error("cache store error: {0}")]
pub struct CacheStoreError(pub String);

/// The external key/value store behind the caches.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read a value; `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError>;

    /// Write a value.
    async fn set(&self, key: &str, value: String) -> Result<(), CacheStoreError>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn del(&self, key: &str) -> Result<(), CacheStoreError>;
}
