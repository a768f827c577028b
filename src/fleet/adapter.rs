//! Generic HTTP verb adapter used for untyped backend calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::connection::ConfigResolver;

/// Fixed adapter verb set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
  Get,
  Put,
  Patch,
  Post,
  Delete,
}

impl Verb {
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "get" => Some(Self::Get),
      "put" => Some(Self::Put),
      "patch" => Some(Self::Patch),
      "post" => Some(Self::Post),
      "delete" => Some(Self::Delete),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "get",
      Self::Put => "put",
      Self::Patch => "patch",
      Self::Post => "post",
      Self::Delete => "delete",
    }
  }

  /// Whether the verb changes server state.
  pub fn is_mutating(&self) -> bool {
    !matches!(self, Self::Get)
  }

  fn method(&self) -> reqwest::Method {
    match self {
      Self::Get => reqwest::Method::GET,
      Self::Put => reqwest::Method::PUT,
      Self::Patch => reqwest::Method::PATCH,
      Self::Post => reqwest::Method::POST,
      Self::Delete => reqwest::Method::DELETE,
    }
  }
}

impl fmt::Display for Verb {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Failure of a single adapter call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
  #[error("network unavailable: {0}")]
  Offline(String),
  #[error("request timed out after {0:?}")]
  Timeout(Duration),
  #[error("server responded with {status}: {body}")]
  Status { status: u16, body: String },
  #[error("failed to decode response: {0}")]
  Decode(String),
  #[error("unsupported call: {0}")]
  Unsupported(String),
}

impl AdapterError {
  /// The call never reached the backend.
  pub fn is_connectivity(&self) -> bool {
    matches!(self, Self::Offline(_) | Self::Timeout(_))
  }

  /// Worth retrying later with the same input.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Offline(_) | Self::Timeout(_) => true,
      Self::Status { status, .. } => *status >= 500 || *status == 429,
      Self::Decode(_) | Self::Unsupported(_) => false,
    }
  }
}

/// Generic verb interface to the backend.
#[async_trait]
pub trait Adapter: Send + Sync {
  async fn request(&self, verb: Verb, endpoint: &str, params: &Value)
    -> Result<Value, AdapterError>;

  async fn get(&self, endpoint: &str, params: &Value) -> Result<Value, AdapterError> {
    self.request(Verb::Get, endpoint, params).await
  }

  async fn put(&self, endpoint: &str, params: &Value) -> Result<Value, AdapterError> {
    self.request(Verb::Put, endpoint, params).await
  }

  async fn patch(&self, endpoint: &str, params: &Value) -> Result<Value, AdapterError> {
    self.request(Verb::Patch, endpoint, params).await
  }

  async fn post(&self, endpoint: &str, params: &Value) -> Result<Value, AdapterError> {
    self.request(Verb::Post, endpoint, params).await
  }

  async fn delete(&self, endpoint: &str, params: &Value) -> Result<Value, AdapterError> {
    self.request(Verb::Delete, endpoint, params).await
  }
}

/// Adapter over HTTP. The endpoint and key are resolved on every call, so a
/// config change applies to the next request.
pub struct HttpAdapter {
  client: reqwest::Client,
  resolver: Arc<ConfigResolver>,
  timeout: Duration,
}

impl HttpAdapter {
  pub fn new(resolver: Arc<ConfigResolver>, timeout: Duration) -> Result<Self, AdapterError> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("fieldsync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| AdapterError::Unsupported(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self {
      client,
      resolver,
      timeout,
    })
  }

  async fn send(&self, verb: Verb, endpoint: &str, params: &Value) -> Result<Value, AdapterError> {
    let config = self.resolver.resolve_all();
    let url = endpoint_url(&config.api_host, endpoint)?;

    let mut request = self
      .client
      .request(verb.method(), url.clone())
      .bearer_auth(&config.api_key)
      .header(reqwest::header::ACCEPT, "application/json");

    request = match verb {
      Verb::Get | Verb::Delete => request.query(&query_pairs(params)),
      _ => request.json(params),
    };

    debug!(verb = %verb, url = %url, "Sending request");

    let response = request.send().await.map_err(|e| classify(e, self.timeout))?;
    let status = response.status();
    let body = response.text().await.map_err(|e| classify(e, self.timeout))?;

    if !status.is_success() {
      return Err(AdapterError::Status {
        status: status.as_u16(),
        body,
      });
    }

    if body.trim().is_empty() {
      return Ok(Value::Null);
    }

    serde_json::from_str(&body).map_err(|e| AdapterError::Decode(e.to_string()))
  }
}

#[async_trait]
impl Adapter for HttpAdapter {
  async fn request(
    &self,
    verb: Verb,
    endpoint: &str,
    params: &Value,
  ) -> Result<Value, AdapterError> {
    match tokio::time::timeout(self.timeout, self.send(verb, endpoint, params)).await {
      Ok(result) => result,
      Err(_) => Err(AdapterError::Timeout(self.timeout)),
    }
  }
}

/// Join an endpoint such as `orders/42/complete` onto `{api_host}/v1/`.
pub fn endpoint_url(api_host: &str, endpoint: &str) -> Result<Url, AdapterError> {
  let base = format!("{}/v1/", api_host.trim_end_matches('/'));
  let base =
    Url::parse(&base).map_err(|e| AdapterError::Unsupported(format!("bad api host {}: {}", api_host, e)))?;

  base
    .join(endpoint.trim_start_matches('/'))
    .map_err(|e| AdapterError::Unsupported(format!("bad endpoint {}: {}", endpoint, e)))
}

/// Flatten a params object into query pairs. Non-object params send nothing.
fn query_pairs(params: &Value) -> Vec<(String, String)> {
  match params {
    Value::Object(map) => map
      .iter()
      .filter(|(_, v)| !v.is_null())
      .map(|(k, v)| {
        let v = match v {
          Value::String(s) => s.clone(),
          other => other.to_string(),
        };
        (k.clone(), v)
      })
      .collect(),
    _ => Vec::new(),
  }
}

/// Map a transport error. Only failures to reach the backend count as
/// offline; redirect loops and malformed requests would fail again on replay.
fn classify(err: reqwest::Error, timeout: Duration) -> AdapterError {
  if err.is_timeout() {
    AdapterError::Timeout(timeout)
  } else if err.is_connect() || err.is_request() {
    AdapterError::Offline(err.to_string())
  } else if err.is_decode() || err.is_body() {
    AdapterError::Decode(err.to_string())
  } else {
    AdapterError::Unsupported(err.to_string())
  }
}
