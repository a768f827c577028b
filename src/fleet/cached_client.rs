//! Fleet read client that serves tracking data through the resource cache.

use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{CacheKey, ResourceCache};
use crate::config::CacheConfig;
use crate::connection::ConfigResolver;
use crate::event::EventBus;

use super::adapter::Adapter;
use super::cache::FleetQueryKey;
use super::types::{OrderEta, OrderTracker};

/// Fleet client with transparent caching for tracker and ETA reads.
#[derive(Clone)]
pub struct FleetClient {
  adapter: Arc<dyn Adapter>,
  cache: ResourceCache,
  resolver: Arc<ConfigResolver>,
  ttls: CacheConfig,
}

impl FleetClient {
  pub fn new(
    adapter: Arc<dyn Adapter>,
    cache: ResourceCache,
    resolver: Arc<ConfigResolver>,
    ttls: CacheConfig,
  ) -> Self {
    Self {
      adapter,
      cache,
      resolver,
      ttls,
    }
  }

  /// Tracking progress of an order, cached for the tracker TTL.
  pub async fn order_tracker(&self, order_id: &str) -> Result<OrderTracker> {
    let key = FleetQueryKey::OrderTracker {
      order_id: order_id.to_string(),
    };
    self.fetch(&key, self.ttls.tracker_ttl()).await
  }

  /// Per-waypoint ETAs of an order, cached for the ETA TTL.
  pub async fn order_eta(&self, order_id: &str) -> Result<OrderEta> {
    let key = FleetQueryKey::OrderEta {
      order_id: order_id.to_string(),
    };
    self.fetch(&key, self.ttls.eta_ttl()).await
  }

  /// Tracking progress, bypassing any cached value.
  pub async fn refresh_order_tracker(&self, order_id: &str) -> Result<OrderTracker> {
    let key = FleetQueryKey::OrderTracker {
      order_id: order_id.to_string(),
    };
    self.fetch(&key, Duration::ZERO).await
  }

  /// ETAs, bypassing any cached value.
  pub async fn refresh_order_eta(&self, order_id: &str) -> Result<OrderEta> {
    let key = FleetQueryKey::OrderEta {
      order_id: order_id.to_string(),
    };
    self.fetch(&key, Duration::ZERO).await
  }

  /// Drop cached tracker and ETA data of an order, for every backend host.
  pub fn invalidate_order(&self, order_id: &str) -> usize {
    let removed = self
      .cache
      .invalidate_prefix(&FleetQueryKey::order_prefix(order_id));
    debug!(order_id, removed, "Invalidated order cache entries");
    removed
  }

  /// Invalidate an order's cached reads whenever a replayed action syncs it.
  ///
  /// The task ends when the event bus is dropped.
  pub fn watch_order_updates(&self, events: &EventBus) -> JoinHandle<()> {
    let mut synced = events.order_synced.subscribe();
    let client = self.clone();

    tokio::spawn(async move {
      loop {
        match synced.recv().await {
          Ok(order) => {
            client.invalidate_order(&order.id);
          }
          Err(RecvError::Lagged(skipped)) => {
            warn!(skipped, "Missed order updates, clearing cache");
            client.cache.clear();
          }
          Err(RecvError::Closed) => break,
        }
      }
    })
  }

  async fn fetch<T>(&self, key: &FleetQueryKey, ttl: Duration) -> Result<T>
  where
    T: serde::Serialize + DeserializeOwned + Send + 'static,
  {
    let api_host = self.resolver.resolve_all().api_host;
    let cache_key = key.cache_key(&api_host);
    let endpoint = key.path();
    let adapter = Arc::clone(&self.adapter);

    debug!(query = %key.description(), "Fetching");

    self
      .cache
      .fetch(
        &cache_key,
        move || async move {
          let value = adapter.get(&endpoint, &Value::Null).await?;
          serde_json::from_value(value).map_err(|e| eyre!("Failed to parse {}: {}", endpoint, e))
        },
        ttl,
      )
      .await
  }
}
