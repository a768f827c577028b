use async_trait::async_trait;
use fieldsync::config::Config;
use fieldsync::connectivity::Dispatch;
use fieldsync::fleet::{Adapter, AdapterError, Verb};
use fieldsync::queue::{QueuedAction, QUEUE_KEY};
use fieldsync::store::{KvStore, MemoryStore};
use fieldsync::Services;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Backend stand-in that records calls and can be unplugged.
struct Backend {
  reachable: AtomicBool,
  calls: Mutex<Vec<(Verb, String)>>,
}

impl Backend {
  fn new() -> Self {
    Self {
      reachable: AtomicBool::new(false),
      calls: Mutex::new(Vec::new()),
    }
  }

  fn calls(&self) -> Vec<(Verb, String)> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl Adapter for Backend {
  async fn request(&self, verb: Verb, endpoint: &str, _: &Value) -> Result<Value, AdapterError> {
    if !self.reachable.load(Ordering::SeqCst) {
      return Err(AdapterError::Offline("network unreachable".to_string()));
    }
    self.calls.lock().unwrap().push((verb, endpoint.to_string()));
    Ok(json!({"id": "order_42", "status": "completed"}))
  }
}

async fn wait_for<F: Fn() -> bool>(check: F) {
  tokio::time::timeout(Duration::from_secs(5), async {
    while !check() {
      tokio::task::yield_now().await;
    }
  })
  .await
  .expect("condition not reached");
}

#[tokio::test]
async fn test_offline_action_replays_once_on_reconnect() {
  let store = Arc::new(MemoryStore::new());
  let backend = Arc::new(Backend::new());
  let services = Services::with_adapter(Config::default(), store.clone(), backend.clone());
  let mut synced = services.events.order_synced.subscribe();
  let mut notices = services.events.replay.subscribe();
  let tasks = services.start();

  let action = QueuedAction::adapter(Verb::Post, "orders/42/complete", json!({}));
  let result = services.dispatcher().dispatch(action).await.unwrap();
  assert_eq!(result, Dispatch::Queued);
  assert!(backend.calls().is_empty());
  assert_eq!(services.queue.len().await.unwrap(), 1);

  backend.reachable.store(true, Ordering::SeqCst);
  services.connectivity.set_online(true);
  wait_for(|| !backend.calls().is_empty()).await;

  let order = synced.recv().await.unwrap();
  assert_eq!(order.id, "order_42");
  let notice = notices.recv().await.unwrap();
  assert!(notice.success);

  // A repeated online report does not replay again
  services.connectivity.set_online(true);
  for _ in 0..20 {
    tokio::task::yield_now().await;
  }

  assert_eq!(backend.calls(), vec![(Verb::Post, "orders/42/complete".to_string())]);
  assert_eq!(store.get(QUEUE_KEY).unwrap().as_deref(), Some("[]"));

  tasks.stop().await;
}

#[tokio::test]
async fn test_queue_survives_restart() {
  let store = Arc::new(MemoryStore::new());
  let backend = Arc::new(Backend::new());

  {
    let services = Services::with_adapter(Config::default(), store.clone(), backend.clone());
    let complete = QueuedAction::adapter(Verb::Post, "orders/1/complete", json!({}));
    let update = QueuedAction::adapter(Verb::Put, "drivers/d_1", json!({"online": true}));
    services.dispatcher().dispatch(complete).await.unwrap();
    services.dispatcher().dispatch(update).await.unwrap();
  }

  // A fresh process over the same store drains on its first online report
  backend.reachable.store(true, Ordering::SeqCst);
  let services = Services::with_adapter(Config::default(), store.clone(), backend.clone());
  let tasks = services.start();
  services.connectivity.set_online(true);
  wait_for(|| backend.calls().len() == 2).await;

  assert_eq!(
    backend.calls(),
    vec![
      (Verb::Post, "orders/1/complete".to_string()),
      (Verb::Put, "drivers/d_1".to_string()),
    ]
  );
  tasks.stop().await;
}

#[tokio::test]
async fn test_replayed_order_drops_cached_tracking() {
  let store = Arc::new(MemoryStore::new());
  let backend = Arc::new(Backend::new());
  let services = Services::with_adapter(Config::default(), store, backend.clone());
  let tasks = services.start();

  let complete = QueuedAction::adapter(Verb::Post, "orders/order_42/complete", json!({}));
  services.dispatcher().dispatch(complete).await.unwrap();

  // Tracker read while the backend is reachable but the client still offline
  backend.reachable.store(true, Ordering::SeqCst);
  services.fleet.order_tracker("order_42").await.unwrap();
  assert_eq!(services.cache.len(), 1);

  services.connectivity.set_online(true);
  wait_for(|| services.cache.is_empty()).await;

  assert_eq!(
    backend.calls(),
    vec![
      (Verb::Get, "orders/order_42/tracker".to_string()),
      (Verb::Post, "orders/order_42/complete".to_string()),
    ]
  );
  tasks.stop().await;
}

#[tokio::test]
async fn test_dispatch_after_reconnect_keeps_user_order() {
  let store = Arc::new(MemoryStore::new());
  let backend = Arc::new(Backend::new());
  let services = Services::with_adapter(Config::default(), store, backend.clone());
  let tasks = services.start();

  let start = QueuedAction::adapter(Verb::Post, "orders/1/start", json!({}));
  services.dispatcher().dispatch(start).await.unwrap();

  backend.reachable.store(true, Ordering::SeqCst);
  services.connectivity.set_online(true);
  let complete = QueuedAction::adapter(Verb::Post, "orders/1/complete", json!({}));
  services.dispatcher().dispatch(complete).await.unwrap();
  wait_for(|| backend.calls().len() == 2).await;

  assert_eq!(
    backend.calls(),
    vec![
      (Verb::Post, "orders/1/start".to_string()),
      (Verb::Post, "orders/1/complete".to_string()),
    ]
  );
  tasks.stop().await;
}

#[tokio::test]
async fn test_deep_link_switches_backend() {
  let store = Arc::new(MemoryStore::new());
  let services = Services::with_adapter(Config::default(), store.clone(), Arc::new(Backend::new()));
  store.set("_driver", r#"{"id":"driver_1"}"#).unwrap();
  let mut resets = services.events.config_reset.subscribe();

  let changed = services
    .resolver
    .apply_deep_link("fieldsync://configure?key=abc&host=https://eu.example.com")
    .unwrap();

  assert!(changed);
  assert_eq!(store.get("_FLEETBASE_KEY").unwrap().as_deref(), Some("abc"));
  assert_eq!(store.get("_driver").unwrap(), None);
  let reset = resets.recv().await.unwrap();
  assert_eq!(reset.config.api_host, "https://eu.example.com");
}
