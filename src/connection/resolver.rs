use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{ConfigField, ConnectionConfig, DeepLinkConfig};
use crate::cache::ResourceCache;
use crate::event::{ConfigReset, EventBus};
use crate::store::KvStore;

/// Store key of the cached authenticated identity.
pub const IDENTITY_KEY: &str = "_driver";

/// Resolves the active connection config and applies runtime overrides.
pub struct ConfigResolver {
  store: Arc<dyn KvStore>,
  defaults: ConnectionConfig,
  cache: ResourceCache,
  events: EventBus,
}

impl ConfigResolver {
  pub fn new(
    store: Arc<dyn KvStore>,
    defaults: ConnectionConfig,
    cache: ResourceCache,
    events: EventBus,
  ) -> Self {
    Self {
      store,
      defaults,
      cache,
      events,
    }
  }

  /// Persisted override if present and non-empty, else the compiled default.
  pub fn resolve(&self, field: ConfigField) -> String {
    match self.store.get(field.store_key()) {
      Ok(Some(value)) if !value.is_empty() => value,
      Ok(_) => self.defaults.get(field).to_string(),
      Err(e) => {
        warn!(field = %field, "Failed to read override, using default: {}", e);
        self.defaults.get(field).to_string()
      }
    }
  }

  pub fn resolve_all(&self) -> ConnectionConfig {
    ConnectionConfig {
      api_key: self.resolve(ConfigField::ApiKey),
      api_host: self.resolve(ConfigField::ApiHost),
      socket_host: self.resolve(ConfigField::SocketHost),
      socket_port: self.resolve(ConfigField::SocketPort),
    }
  }

  pub fn defaults(&self) -> &ConnectionConfig {
    &self.defaults
  }

  /// Persist all four fields in one write, then reset dependent state.
  ///
  /// When the resolved config actually changed, the persisted identity is
  /// removed, the resource cache is cleared and [`ConfigReset`] is published.
  /// Applying the current config again only re-persists it. Returns whether
  /// the config changed.
  pub fn set_connection_config(&self, config: &ConnectionConfig) -> Result<bool> {
    let previous = self.resolve_all();

    let entries: Vec<(&str, &str)> = ConfigField::ALL
      .iter()
      .map(|field| (field.store_key(), config.get(*field)))
      .collect();
    self.store.set_many(&entries)?;

    if previous == *config {
      debug!("Connection config unchanged");
      return Ok(false);
    }

    self.store.remove(IDENTITY_KEY)?;
    self.cache.clear();

    let delivered = self.events.config_reset.publish(ConfigReset {
      config: config.clone(),
    });
    info!(
      api_host = %config.api_host,
      socket_host = %config.socket_host,
      socket_port = %config.socket_port,
      subscribers = delivered,
      "Connection config changed, dependent state reset"
    );

    Ok(true)
  }

  /// Apply a configuration deep link.
  ///
  /// Links that are not configuration links, or carry no fields, change
  /// nothing and return `Ok(false)`.
  pub fn apply_deep_link(&self, link: &str) -> Result<bool> {
    let parsed = match DeepLinkConfig::parse(link) {
      Some(parsed) if !parsed.is_empty() => parsed,
      Some(_) => {
        debug!("Configuration link without fields ignored");
        return Ok(false);
      }
      None => {
        debug!("Not a configuration link");
        return Ok(false);
      }
    };

    let config = parsed.merge_into(&self.resolve_all());
    self.set_connection_config(&config)
  }
}
