//! Cache layer that orchestrates memoization and in-flight de-duplication.

use color_eyre::{eyre::eyre, Report, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::traits::{CacheEntry, CacheStats};

/// Outcome shared with every caller waiting on one fetch.
type SharedResult = std::result::Result<Value, Arc<Report>>;

#[derive(Default)]
struct Tables {
  entries: HashMap<String, CacheEntry>,
  in_flight: HashMap<String, InFlight>,
  stats: CacheStats,
}

/// A pending fetch.
struct InFlight {
  sender: broadcast::Sender<SharedResult>,
  /// Set when the key was invalidated while loading; the result is then
  /// handed to waiters but not stored.
  invalidated: bool,
}

/// Keyed TTL cache with request coalescing.
///
/// Construct once per process and clone it into consumers; clones share the
/// same tables. The tables are only mutated through these methods.
#[derive(Clone, Default)]
pub struct ResourceCache {
  tables: Arc<Mutex<Tables>>,
}

/// What a fetch decided to do while holding the lock.
enum Plan {
  Hit(Value),
  Wait(broadcast::Receiver<SharedResult>),
  Load {
    sender: broadcast::Sender<SharedResult>,
    receiver: broadcast::Receiver<SharedResult>,
  },
}

impl ResourceCache {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
    self
      .tables
      .lock()
      .map_err(|e| eyre!("Cache lock poisoned: {}", e))
  }

  /// Fetch a value with cache-first strategy.
  ///
  /// 1. A fresh entry is returned without calling `loader`
  /// 2. A fetch already in flight for `key` is joined
  /// 3. Otherwise `loader` runs once and its result is shared with every
  ///    caller that joined meanwhile
  ///
  /// A zero `ttl` skips step 1. Failures are not cached, so the next caller
  /// retries immediately. The loader runs on its own task and settles even if
  /// every caller goes away or the loader panics.
  pub async fn fetch<T, F, Fut>(&self, key: &str, loader: F, ttl: Duration) -> Result<T>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let plan = {
      let mut tables = self.lock()?;

      let fresh = tables
        .entries
        .get(key)
        .filter(|entry| entry.is_fresh(ttl))
        .map(|entry| entry.value.clone());

      if let Some(value) = fresh {
        tables.stats.hits += 1;
        Plan::Hit(value)
      } else if let Some(flight) = tables.in_flight.get(key) {
        let receiver = flight.sender.subscribe();
        tables.stats.coalesced += 1;
        debug!(key, "Joining in-flight fetch");
        Plan::Wait(receiver)
      } else {
        let (sender, receiver) = broadcast::channel(1);
        tables.in_flight.insert(
          key.to_string(),
          InFlight {
            sender: sender.clone(),
            invalidated: false,
          },
        );
        tables.stats.loads += 1;
        Plan::Load { sender, receiver }
      }
    };

    let mut receiver = match plan {
      Plan::Hit(value) => return decode(key, value),
      Plan::Wait(receiver) => receiver,
      Plan::Load { sender, receiver } => {
        self.spawn_load(key.to_string(), loader(), sender);
        receiver
      }
    };

    match receiver.recv().await {
      Ok(Ok(value)) => decode(key, value),
      Ok(Err(report)) => Err(eyre!("{:#}", report)),
      Err(_) => Err(eyre!("Fetch for {} ended without a result", key)),
    }
  }

  fn spawn_load<T, Fut>(&self, key: String, future: Fut, sender: broadcast::Sender<SharedResult>)
  where
    T: Serialize + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let tables = Arc::clone(&self.tables);

    tokio::spawn(async move {
      let result: SharedResult = match tokio::spawn(future).await {
        Ok(Ok(data)) => serde_json::to_value(&data)
          .map_err(|e| Arc::new(eyre!("Failed to encode {}: {}", key, e))),
        Ok(Err(report)) => Err(Arc::new(report)),
        Err(e) => Err(Arc::new(eyre!("Loader for {} did not finish: {}", key, e))),
      };

      // Settle the tables before waking waiters, so a waiter that immediately
      // fetches again sees the stored entry.
      match tables.lock() {
        Ok(mut tables) => {
          let invalidated = tables
            .in_flight
            .remove(&key)
            .is_some_and(|flight| flight.invalidated);
          match &result {
            Ok(_) if invalidated => {
              debug!(key = %key, "Invalidated while loading, result not cached");
            }
            Ok(value) => {
              tables.entries.insert(
                key.clone(),
                CacheEntry {
                  key: key.clone(),
                  value: value.clone(),
                  stored_at: Instant::now(),
                },
              );
            }
            Err(report) => {
              tables.stats.failures += 1;
              debug!(key = %key, error = %report, "Loader failed, nothing cached");
            }
          }
        }
        Err(e) => warn!(key = %key, "Cache lock poisoned: {}", e),
      }

      // Ignore send errors - every caller may have gone away
      let _ = sender.send(result);
    });
  }

  /// Remove one entry regardless of its age. A fetch in flight for the key
  /// still answers its waiters but does not store its result.
  pub fn invalidate(&self, key: &str) -> bool {
    match self.lock() {
      Ok(mut tables) => {
        if let Some(flight) = tables.in_flight.get_mut(key) {
          flight.invalidated = true;
        }
        tables.entries.remove(key).is_some()
      }
      Err(e) => {
        warn!("{}", e);
        false
      }
    }
  }

  /// Remove every entry whose key starts with `prefix`. Returns the count.
  pub fn invalidate_prefix(&self, prefix: &str) -> usize {
    match self.lock() {
      Ok(mut tables) => {
        for (_, flight) in tables.in_flight.iter_mut().filter(|(key, _)| key.starts_with(prefix)) {
          flight.invalidated = true;
        }
        let before = tables.entries.len();
        tables.entries.retain(|key, _| !key.starts_with(prefix));
        before - tables.entries.len()
      }
      Err(e) => {
        warn!("{}", e);
        0
      }
    }
  }

  /// Drop all entries. Fetches in flight still settle but store nothing.
  pub fn clear(&self) {
    match self.lock() {
      Ok(mut tables) => {
        tables.entries.clear();
        for flight in tables.in_flight.values_mut() {
          flight.invalidated = true;
        }
      }
      Err(e) => warn!("{}", e),
    }
  }

  pub fn len(&self) -> usize {
    self.lock().map(|t| t.entries.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn in_flight_count(&self) -> usize {
    self.lock().map(|t| t.in_flight.len()).unwrap_or(0)
  }

  pub fn stats(&self) -> CacheStats {
    self.lock().map(|t| t.stats).unwrap_or_default()
  }
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Result<T> {
  serde_json::from_value(value).map_err(|e| eyre!("Failed to decode cached {}: {}", key, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  const TTL: Duration = Duration::from_secs(30);

  fn counting_loader(
    calls: &Arc<AtomicUsize>,
    value: u32,
  ) -> impl FnOnce() -> std::pin::Pin<Box<dyn Future<Output = Result<u32>> + Send>> {
    let calls = Arc::clone(calls);
    move || {
      Box::pin(async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value)
      })
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_fresh_entry_skips_loader() {
    let cache = ResourceCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let first: u32 = cache.fetch("k", counting_loader(&calls, 1), TTL).await.unwrap();
    let second: u32 = cache.fetch("k", counting_loader(&calls, 2), TTL).await.unwrap();

    assert_eq!(first, 1);
    assert_eq!(second, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().hits, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_stale_entry_reloads() {
    let cache = ResourceCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let _: u32 = cache.fetch("k", counting_loader(&calls, 1), TTL).await.unwrap();
    tokio::time::advance(TTL).await;
    let second: u32 = cache.fetch("k", counting_loader(&calls, 2), TTL).await.unwrap();

    assert_eq!(second, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_zero_ttl_forces_refresh() {
    let cache = ResourceCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let _: u32 = cache.fetch("k", counting_loader(&calls, 1), TTL).await.unwrap();
    let forced: u32 = cache
      .fetch("k", counting_loader(&calls, 2), Duration::ZERO)
      .await
      .unwrap();
    // The forced result replaces the entry
    let after: u32 = cache.fetch("k", counting_loader(&calls, 3), TTL).await.unwrap();

    assert_eq!(forced, 2);
    assert_eq!(after, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_concurrent_fetches_coalesce() {
    let cache = ResourceCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let loader = {
      let calls = Arc::clone(&calls);
      move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        let _ = release_rx.await;
        Ok::<_, Report>("tracker".to_string())
      }
    };

    let first = {
      let cache = cache.clone();
      tokio::spawn(async move { cache.fetch::<String, _, _>("k", loader, TTL).await })
    };

    // Wait until the first fetch is registered as in flight
    while cache.in_flight_count() == 0 {
      tokio::task::yield_now().await;
    }

    let mut joiners = Vec::new();
    for _ in 0..4 {
      let cache = cache.clone();
      let calls = Arc::clone(&calls);
      joiners.push(tokio::spawn(async move {
        cache
          .fetch::<String, _, _>(
            "k",
            move || async move {
              calls.fetch_add(1, Ordering::SeqCst);
              Ok::<_, Report>("second load".to_string())
            },
            TTL,
          )
          .await
      }));
    }

    while cache.stats().coalesced < 4 {
      tokio::task::yield_now().await;
    }
    release_tx.send(()).unwrap();

    assert_eq!(first.await.unwrap().unwrap(), "tracker");
    for joiner in joiners {
      assert_eq!(joiner.await.unwrap().unwrap(), "tracker");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.in_flight_count(), 0);
  }

  #[tokio::test]
  async fn test_failure_is_not_cached() {
    let cache = ResourceCache::new();

    let result: Result<u32> = cache
      .fetch("k", || async { Err(eyre!("backend down")) }, TTL)
      .await;
    let err = result.unwrap_err();
    assert!(err.to_string().contains("backend down"));
    assert_eq!(cache.in_flight_count(), 0);
    assert!(cache.is_empty());

    let calls = Arc::new(AtomicUsize::new(0));
    let value: u32 = cache.fetch("k", counting_loader(&calls, 7), TTL).await.unwrap();
    assert_eq!(value, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().failures, 1);
  }

  #[tokio::test]
  async fn test_invalidate() {
    let cache = ResourceCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let _: u32 = cache
      .fetch("orders/1/tracker@abc", counting_loader(&calls, 1), TTL)
      .await
      .unwrap();
    let _: u32 = cache
      .fetch("orders/1/eta@abc", counting_loader(&calls, 1), TTL)
      .await
      .unwrap();
    let _: u32 = cache
      .fetch("orders/2/eta@abc", counting_loader(&calls, 1), TTL)
      .await
      .unwrap();

    assert!(cache.invalidate("orders/2/eta@abc"));
    assert!(!cache.invalidate("orders/2/eta@abc"));
    assert_eq!(cache.invalidate_prefix("orders/1/"), 2);
    assert!(cache.is_empty());

    let _: u32 = cache
      .fetch("orders/1/tracker@abc", counting_loader(&calls, 1), TTL)
      .await
      .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    cache.clear();
    assert!(cache.is_empty());
  }

  #[tokio::test]
  async fn test_invalidation_during_load_discards_result() {
    let cache = ResourceCache::new();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let pending = {
      let cache = cache.clone();
      tokio::spawn(async move {
        cache
          .fetch::<String, _, _>(
            "orders/1/tracker@abc",
            move || async move {
              let _ = release_rx.await;
              Ok::<_, Report>("pre-transition".to_string())
            },
            TTL,
          )
          .await
      })
    };
    while cache.in_flight_count() == 0 {
      tokio::task::yield_now().await;
    }

    assert_eq!(cache.invalidate_prefix("orders/1/"), 0);
    release_tx.send(()).unwrap();

    // The caller that started the load still gets its answer
    assert_eq!(pending.await.unwrap().unwrap(), "pre-transition");
    assert!(cache.is_empty());

    let calls = Arc::new(AtomicUsize::new(0));
    let reloaded: String = cache
      .fetch(
        "orders/1/tracker@abc",
        {
          let calls = Arc::clone(&calls);
          move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Report>("post-transition".to_string())
          }
        },
        TTL,
      )
      .await
      .unwrap();
    assert_eq!(reloaded, "post-transition");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_clear_during_load_discards_result() {
    let cache = ResourceCache::new();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let pending = {
      let cache = cache.clone();
      tokio::spawn(async move {
        cache
          .fetch::<u32, _, _>(
            "k",
            move || async move {
              let _ = release_rx.await;
              Ok::<_, Report>(1)
            },
            TTL,
          )
          .await
      })
    };
    while cache.in_flight_count() == 0 {
      tokio::task::yield_now().await;
    }

    cache.clear();
    release_tx.send(()).unwrap();

    assert_eq!(pending.await.unwrap().unwrap(), 1);
    assert!(cache.is_empty());
  }

  #[tokio::test]
  async fn test_panicking_loader_releases_key() {
    let cache = ResourceCache::new();

    let result = tokio::time::timeout(
      Duration::from_secs(5),
      cache.fetch::<u32, _, _>(
        "k",
        || async {
          let fail = true;
          if fail {
            panic!("loader blew up");
          }
          Ok::<u32, Report>(0)
        },
        TTL,
      ),
    )
    .await
    .expect("first caller must not hang");
    assert!(result.is_err());
    assert_eq!(cache.in_flight_count(), 0);
    assert_eq!(cache.stats().failures, 1);

    let calls = Arc::new(AtomicUsize::new(0));
    let value: u32 = tokio::time::timeout(
      Duration::from_secs(5),
      cache.fetch("k", counting_loader(&calls, 3), TTL),
    )
    .await
    .expect("next caller must not hang")
    .unwrap();
    assert_eq!(value, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
