//! Result caching for the generation pipeline.
//!
//! Two independent tiers share one key-derivation rule:
//! - [`MemoryCache`]: bounded, expiring, in-process store for cheap
//!   intermediate values (expanded prompts, generated scene source)
//! - [`DurableCache`]: JSON-indexed registry of rendered artifacts on disk

pub mod durable;
pub mod error;
pub mod key;
pub mod memory;

pub use durable::{DurableCache, DurableCacheConfig, DurableCacheStats, DurableEntry};
pub use error::{CacheError, CacheResult};
pub use key::{cache_key, normalize_prompt, DEFAULT_VARIANT};
pub use memory::{MemoryCache, MemoryCacheConfig, MemoryCacheStats};

/// Metric names emitted by this crate.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "p2f_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "p2f_cache_misses_total";
    pub const CACHE_EVICTIONS_TOTAL: &str = "p2f_cache_evictions_total";
}
