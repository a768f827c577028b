//! Resource cache for read endpoints.
//!
//! This module provides an in-process cache that:
//! - Memoizes loader results per key for a caller-chosen TTL
//! - Evaluates staleness lazily at read time, never in the background
//! - Coalesces concurrent fetches for one key into a single loader call
//! - Supports forced refresh (`ttl = 0`) and explicit invalidation

mod layer;
mod traits;

pub use layer::ResourceCache;
pub use traits::{host_fingerprint, CacheEntry, CacheKey, CacheStats};
