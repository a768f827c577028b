//! Runtime connection configuration.
//!
//! The active backend is resolved from persisted overrides, falling back to
//! compiled defaults. A deep link can repoint the client at another backend;
//! all four fields always change together.

mod deep_link;
mod resolver;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use deep_link::{DeepLinkConfig, CONFIGURE_PATH};
pub use resolver::{ConfigResolver, IDENTITY_KEY};

/// Backend endpoint the client talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
  pub api_key: String,
  pub api_host: String,
  pub socket_host: String,
  pub socket_port: String,
}

impl Default for ConnectionConfig {
  fn default() -> Self {
    Self {
      api_key: String::new(),
      api_host: "https://api.fleetbase.io".to_string(),
      socket_host: "socket.fleetbase.io".to_string(),
      socket_port: "8000".to_string(),
    }
  }
}

impl ConnectionConfig {
  pub fn get(&self, field: ConfigField) -> &str {
    match field {
      ConfigField::ApiKey => &self.api_key,
      ConfigField::ApiHost => &self.api_host,
      ConfigField::SocketHost => &self.socket_host,
      ConfigField::SocketPort => &self.socket_port,
    }
  }

  fn set(&mut self, field: ConfigField, value: String) {
    match field {
      ConfigField::ApiKey => self.api_key = value,
      ConfigField::ApiHost => self.api_host = value,
      ConfigField::SocketHost => self.socket_host = value,
      ConfigField::SocketPort => self.socket_port = value,
    }
  }
}

/// One field of the connection config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigField {
  ApiKey,
  ApiHost,
  SocketHost,
  SocketPort,
}

impl ConfigField {
  pub const ALL: [ConfigField; 4] = [
    ConfigField::ApiKey,
    ConfigField::ApiHost,
    ConfigField::SocketHost,
    ConfigField::SocketPort,
  ];

  /// Store key holding the persisted override.
  pub fn store_key(&self) -> &'static str {
    match self {
      Self::ApiKey => "_FLEETBASE_KEY",
      Self::ApiHost => "_FLEETBASE_HOST",
      Self::SocketHost => "_SOCKETCLUSTER_HOST",
      Self::SocketPort => "_SOCKETCLUSTER_PORT",
    }
  }
}

impl fmt::Display for ConfigField {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::ApiKey => "api_key",
      Self::ApiHost => "api_host",
      Self::SocketHost => "socket_host",
      Self::SocketPort => "socket_port",
    };
    f.pad(name)
  }
}
