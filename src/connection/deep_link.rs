//! Deep-link parsing for runtime backend configuration.
//!
//! Accepted form: `scheme://configure?key=..&host=..&socketcluster_host=..&socketcluster_port=..`,
//! or the bare `configure?...` path. Anything else is ignored.

use url::{form_urlencoded, Url};

use super::{ConfigField, ConnectionConfig};

/// Path that marks a configuration deep link.
pub const CONFIGURE_PATH: &str = "configure";

/// Fields carried by a configuration deep link. Unset fields keep their
/// current value when applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeepLinkConfig {
  pub api_key: Option<String>,
  pub api_host: Option<String>,
  pub socket_host: Option<String>,
  pub socket_port: Option<String>,
}

impl DeepLinkConfig {
  /// Parse a deep link. Returns `None` for links that are not configuration
  /// links or cannot be read at all.
  pub fn parse(input: &str) -> Option<Self> {
    let input = input.trim();
    if input.is_empty() {
      return None;
    }

    let (route, query) = match Url::parse(input) {
      Ok(url) => (route_of(&url), url.query().unwrap_or_default().to_string()),
      // No scheme: treat the input as `path?query`
      Err(_) => match input.split_once('?') {
        Some((path, query)) => (path.trim_matches('/').to_string(), query.to_string()),
        None => (input.trim_matches('/').to_string(), String::new()),
      },
    };

    if route != CONFIGURE_PATH {
      return None;
    }

    let mut config = Self::default();
    // Segments without `=` decode to empty values and are skipped with them
    for (name, value) in form_urlencoded::parse(query.as_bytes()) {
      let value = value.trim();
      if value.is_empty() {
        continue;
      }
      let slot = match name.as_ref() {
        "key" => &mut config.api_key,
        "host" => &mut config.api_host,
        "socketcluster_host" => &mut config.socket_host,
        "socketcluster_port" => &mut config.socket_port,
        _ => continue,
      };
      *slot = Some(value.to_string());
    }

    Some(config)
  }

  pub fn is_empty(&self) -> bool {
    self == &Self::default()
  }

  fn field(&self, field: ConfigField) -> Option<&String> {
    match field {
      ConfigField::ApiKey => self.api_key.as_ref(),
      ConfigField::ApiHost => self.api_host.as_ref(),
      ConfigField::SocketHost => self.socket_host.as_ref(),
      ConfigField::SocketPort => self.socket_port.as_ref(),
    }
  }

  /// Overlay the set fields onto a base config.
  pub fn merge_into(&self, base: &ConnectionConfig) -> ConnectionConfig {
    let mut merged = base.clone();
    for field in ConfigField::ALL {
      if let Some(value) = self.field(field) {
        merged.set(field, value.clone());
      }
    }
    merged
  }
}

/// Route of a parsed URL. Custom schemes carry the route in the host
/// (`fieldsync://configure`), web links in the path.
fn route_of(url: &Url) -> String {
  let path = url.path().trim_matches('/');
  if url.cannot_be_a_base() {
    return path.to_string();
  }
  if url.scheme() == "http" || url.scheme() == "https" {
    return path.to_string();
  }
  match url.host_str() {
    Some(host) if path.is_empty() => host.to_string(),
    Some(host) => format!("{}/{}", host, path),
    None => path.to_string(),
  }
}
