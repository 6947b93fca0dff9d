//! Caching layers for StepChain.
//!
//! Two independent caches share one [`CacheStore`](stepchain_core::CacheStore):
//!
//! - [`ResponseCache`] memoizes deterministic provider calls by content hash.
//! - [`PauseCache`] persists a paused chain cursor keyed by run id.
//!
//! Both are strictly best-effort: any store failure degrades to a miss.

pub mod in_memory;
pub mod pause;
pub mod response;

pub use in_memory::InMemoryStore;
pub use pause::{CachedChain, PauseCache};
pub use response::{ResponseCache, cache_key, should_cache};
