//! Process-wide wiring of the resilience services.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::ResourceCache;
use crate::config::Config;
use crate::connection::ConfigResolver;
use crate::connectivity::{drain_on_reconnect, Connectivity, Dispatcher};
use crate::event::EventBus;
use crate::fleet::{Adapter, FleetClient, HttpAdapter};
use crate::location::{LocationProvider, LocationSync};
use crate::queue::{ActionQueue, RetryPolicy};
use crate::store::KvStore;

/// All services, constructed once per process and shared by cloning.
#[derive(Clone)]
pub struct Services {
  pub store: Arc<dyn KvStore>,
  pub events: EventBus,
  pub cache: ResourceCache,
  pub resolver: Arc<ConfigResolver>,
  pub adapter: Arc<dyn Adapter>,
  pub queue: Arc<ActionQueue>,
  pub fleet: FleetClient,
  pub connectivity: Connectivity,
  config: Config,
}

impl Services {
  /// Wire everything against the HTTP adapter.
  pub fn new(config: Config, store: Arc<dyn KvStore>) -> Result<Self> {
    let events = EventBus::new();
    let cache = ResourceCache::new();
    let resolver = Arc::new(ConfigResolver::new(
      Arc::clone(&store),
      config.connection.clone(),
      cache.clone(),
      events.clone(),
    ));
    let adapter = HttpAdapter::new(Arc::clone(&resolver), config.http.timeout())
      .map_err(|e| eyre!("Failed to create HTTP adapter: {}", e))?;

    Ok(Self::assemble(config, store, events, cache, resolver, Arc::new(adapter)))
  }

  /// Wire everything against a given adapter.
  pub fn with_adapter(config: Config, store: Arc<dyn KvStore>, adapter: Arc<dyn Adapter>) -> Self {
    let events = EventBus::new();
    let cache = ResourceCache::new();
    let resolver = Arc::new(ConfigResolver::new(
      Arc::clone(&store),
      config.connection.clone(),
      cache.clone(),
      events.clone(),
    ));

    Self::assemble(config, store, events, cache, resolver, adapter)
  }

  fn assemble(
    config: Config,
    store: Arc<dyn KvStore>,
    events: EventBus,
    cache: ResourceCache,
    resolver: Arc<ConfigResolver>,
    adapter: Arc<dyn Adapter>,
  ) -> Self {
    let queue = Arc::new(ActionQueue::new(
      Arc::clone(&store),
      Arc::clone(&adapter),
      events.clone(),
      RetryPolicy::from(&config.queue),
    ));
    let fleet = FleetClient::new(
      Arc::clone(&adapter),
      cache.clone(),
      Arc::clone(&resolver),
      config.cache.clone(),
    );

    Self {
      store,
      events,
      cache,
      resolver,
      adapter,
      queue,
      fleet,
      connectivity: Connectivity::new(false),
      config,
    }
  }

  /// Start the background tasks: queue replay on every reconnect, and cache
  /// invalidation for orders a replay synced. They run until the returned
  /// handle is stopped or dropped.
  pub fn start(&self) -> ServicesHandle {
    let tasks = vec![
      drain_on_reconnect(&self.connectivity, Arc::clone(&self.queue)),
      self.fleet.watch_order_updates(&self.events),
    ];
    debug!(tasks = tasks.len(), "Background tasks started");
    ServicesHandle {
      queue: Arc::clone(&self.queue),
      tasks,
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn dispatcher(&self) -> Dispatcher {
    Dispatcher::new(
      Arc::clone(&self.adapter),
      Arc::clone(&self.queue),
      self.connectivity.clone(),
    )
  }

  /// Location sampler using the configured interval and HTTP timeout.
  pub fn location_sync(&self, provider: Arc<dyn LocationProvider>) -> Arc<LocationSync> {
    Arc::new(
      LocationSync::new(
        provider,
        Arc::clone(&self.store),
        self.events.clone(),
        self.config.location.interval(),
      )
      .with_timeout(self.config.http.timeout()),
    )
  }
}

/// Owner of the background tasks started by [`Services::start`].
pub struct ServicesHandle {
  queue: Arc<ActionQueue>,
  tasks: Vec<JoinHandle<()>>,
}

impl ServicesHandle {
  /// Stop every task and wait for them to end. A replay in progress is
  /// allowed to finish first; dropping the handle instead aborts at once.
  pub async fn stop(mut self) {
    let queue = Arc::clone(&self.queue);
    let _replay = queue.hold_replay().await;
    for task in self.tasks.drain(..) {
      task.abort();
      let _ = task.await;
    }
  }

  pub fn is_running(&self) -> bool {
    self.tasks.iter().any(|task| !task.is_finished())
  }
}

impl Drop for ServicesHandle {
  fn drop(&mut self) {
    for task in &self.tasks {
      task.abort();
    }
  }
}
