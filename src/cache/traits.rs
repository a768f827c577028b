//! Core traits and types for the caching system.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::time::Instant;

/// Trait for logical resources that can be cached.
pub trait CacheKey {
  /// Logical resource path (e.g. `orders/{id}/tracker`).
  fn path(&self) -> String;

  /// Human-readable description for logging.
  fn description(&self) -> String;

  /// Cache key scoped to the backend host.
  ///
  /// Entries cached against one host are never served after the client is
  /// repointed at another.
  fn cache_key(&self, api_host: &str) -> String {
    format!("{}@{}", self.path(), host_fingerprint(api_host))
  }
}

/// Short stable fingerprint of a backend host.
pub fn host_fingerprint(api_host: &str) -> String {
  let normalized = api_host.trim().trim_end_matches('/').to_lowercase();

  let mut hasher = Sha256::new();
  hasher.update(normalized.as_bytes());
  let digest = hasher.finalize();
  hex::encode(&digest[..6])
}

/// A memoized loader result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: String,
  pub value: Value,
  pub stored_at: Instant,
}

impl CacheEntry {
  /// Fresh while `now - stored_at < ttl`. A zero TTL is never fresh.
  pub fn is_fresh(&self, ttl: Duration) -> bool {
    self.stored_at.elapsed() < ttl
  }
}

/// Counters for monitoring cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
  /// Served from a fresh entry
  pub hits: u64,
  /// Joined a fetch already in flight
  pub coalesced: u64,
  /// Loader invocations
  pub loads: u64,
  /// Loader invocations that failed
  pub failures: u64,
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Tracker(&'static str);

  impl CacheKey for Tracker {
    fn path(&self) -> String {
      format!("orders/{}/tracker", self.0)
    }

    fn description(&self) -> String {
      format!("tracker for {}", self.0)
    }
  }

  #[test]
  fn test_cache_key_is_scoped_to_host() {
    let key = Tracker("order_1");

    let a = key.cache_key("https://api.fleetbase.io");
    let b = key.cache_key("https://api.fleetbase.io/");
    let c = key.cache_key("https://fleet.example.com");

    assert!(a.starts_with("orders/order_1/tracker@"));
    assert_eq!(a, b);
    assert_ne!(a, c);
  }

  #[test]
  fn test_fingerprint_length() {
    assert_eq!(host_fingerprint("https://api.fleetbase.io").len(), 12);
  }

  #[tokio::test(start_paused = true)]
  async fn test_entry_freshness() {
    let entry = CacheEntry {
      key: "k".to_string(),
      value: Value::Null,
      stored_at: Instant::now(),
    };

    assert!(entry.is_fresh(Duration::from_secs(10)));
    assert!(!entry.is_fresh(Duration::ZERO));

    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(!entry.is_fresh(Duration::from_secs(10)));
  }
}
