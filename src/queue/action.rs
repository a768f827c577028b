//! Deferred mutating calls.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::fleet::adapter::{Adapter, AdapterError, Verb};
use crate::fleet::resource::{lookup, ResourceKind, ResourceOp};

/// What a queued action does when replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  /// Generic adapter call against the action's endpoint
  Adapter(Verb),
  /// Named operation on a typed resource handle
  Resource(ResourceOp),
}

impl Method {
  /// Parse a method name in the context of a resource type. Adapter verbs win
  /// over resource operations of the same name.
  pub fn parse(method: &str, resource_type: &str) -> Result<Self> {
    if let Some(verb) = Verb::parse(method) {
      return Ok(Self::Adapter(verb));
    }

    let kind = ResourceKind::parse(resource_type)
      .ok_or_else(|| eyre!("Unknown resource type {:?} for method {}", resource_type, method))?;

    ResourceOp::parse(kind, method)
      .map(Self::Resource)
      .ok_or_else(|| eyre!("Unsupported method {} for resource {}", method, kind))
  }

  pub fn name(&self) -> &'static str {
    match self {
      Self::Adapter(verb) => verb.as_str(),
      Self::Resource(op) => op.name(),
    }
  }
}

/// A mutating call captured while offline, replayed on reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredAction", into = "StoredAction")]
pub struct QueuedAction {
  pub method: Method,
  pub resource_type: String,
  pub resource_id: Option<String>,
  pub endpoint: String,
  pub params: Value,
  pub enqueued_at: DateTime<Utc>,
}

impl QueuedAction {
  /// Generic adapter call, e.g. `post orders/42/complete`.
  pub fn adapter(verb: Verb, endpoint: impl Into<String>, params: Value) -> Self {
    let endpoint = endpoint.into();
    let resource_type = endpoint
      .trim_start_matches('/')
      .split('/')
      .next()
      .unwrap_or_default()
      .to_string();

    Self {
      method: Method::Adapter(verb),
      resource_type,
      resource_id: None,
      endpoint,
      params,
      enqueued_at: Utc::now(),
    }
  }

  /// Operation on a typed resource, e.g. `complete` on order `order_42`.
  pub fn resource(op: ResourceOp, resource_id: impl Into<String>, params: Value) -> Self {
    let resource_id = resource_id.into();
    let kind = op.kind();

    Self {
      method: Method::Resource(op),
      resource_type: kind.as_str().to_string(),
      endpoint: format!("{}/{}", kind.collection(), resource_id),
      resource_id: Some(resource_id),
      params,
      enqueued_at: Utc::now(),
    }
  }

  /// Build from loosely typed parts, rejecting unsupported methods.
  pub fn from_parts(
    method: &str,
    resource_type: &str,
    resource_id: Option<&str>,
    endpoint: &str,
    params: Value,
  ) -> Result<Self> {
    Ok(Self {
      method: Method::parse(method, resource_type)?,
      resource_type: resource_type.to_string(),
      resource_id: resource_id.map(String::from),
      endpoint: endpoint.to_string(),
      params,
      enqueued_at: Utc::now(),
    })
  }

  /// Perform the call.
  pub async fn execute(&self, adapter: &Arc<dyn Adapter>) -> Result<Value, AdapterError> {
    match self.method {
      Method::Adapter(verb) => adapter.request(verb, &self.endpoint, &self.params).await,
      Method::Resource(op) => {
        let handle = lookup(op.kind(), self.resource_id.as_deref(), Arc::clone(adapter))
          .ok_or_else(|| {
            AdapterError::Unsupported(format!("no {} handle for {}", op.kind(), self))
          })?;
        handle.invoke(op, &self.params).await
      }
    }
  }
}

impl fmt::Display for QueuedAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match (&self.method, &self.resource_id) {
      (Method::Adapter(verb), _) => write!(f, "{} {}", verb, self.endpoint),
      (Method::Resource(op), Some(id)) => write!(f, "{} {} {}", op.name(), self.resource_type, id),
      (Method::Resource(op), None) => write!(f, "{} {}", op.name(), self.resource_type),
    }
  }
}

/// Persisted shape of a queued action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredAction {
  method: String,
  #[serde(default)]
  resource_type: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  resource_id: Option<String>,
  endpoint: String,
  #[serde(default)]
  params: Value,
  enqueued_at: DateTime<Utc>,
}

impl TryFrom<StoredAction> for QueuedAction {
  type Error = String;

  fn try_from(stored: StoredAction) -> std::result::Result<Self, Self::Error> {
    let method = Method::parse(&stored.method, &stored.resource_type).map_err(|e| e.to_string())?;

    Ok(Self {
      method,
      resource_type: stored.resource_type,
      resource_id: stored.resource_id,
      endpoint: stored.endpoint,
      params: stored.params,
      enqueued_at: stored.enqueued_at,
    })
  }
}

impl From<QueuedAction> for StoredAction {
  fn from(action: QueuedAction) -> Self {
    Self {
      method: action.method.name().to_string(),
      resource_type: action.resource_type,
      resource_id: action.resource_id,
      endpoint: action.endpoint,
      params: action.params,
      enqueued_at: action.enqueued_at,
    }
  }
}
