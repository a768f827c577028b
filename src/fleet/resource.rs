//! Typed resource handles with a closed set of server-side operations.
//!
//! A queued action that names a resource method is parsed into a
//! [`ResourceOp`] when it is constructed, so an unknown method is rejected
//! up front instead of being silently skipped at replay time.

use serde_json::Value;
use url::form_urlencoded;
use std::fmt;
use std::sync::Arc;

use super::adapter::{Adapter, AdapterError, Verb};

/// Backend resource kinds that expose operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
  Order,
  Driver,
  Place,
}

impl ResourceKind {
  /// Accepts singular and plural type names, case-insensitively.
  pub fn parse(s: &str) -> Option<Self> {
    match s.trim().to_lowercase().as_str() {
      "order" | "orders" => Some(Self::Order),
      "driver" | "drivers" => Some(Self::Driver),
      "place" | "places" => Some(Self::Place),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Order => "order",
      Self::Driver => "driver",
      Self::Place => "place",
    }
  }

  /// Collection path segment, e.g. `orders`.
  pub fn collection(&self) -> &'static str {
    match self {
      Self::Order => "orders",
      Self::Driver => "drivers",
      Self::Place => "places",
    }
  }
}

impl fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderOp {
  Start,
  UpdateActivity,
  SetDestination,
  CaptureSignature,
  CaptureQrCode,
  Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverOp {
  Track,
  Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceOp {
  Update,
  Destroy,
}

/// A supported operation on a resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceOp {
  Order(OrderOp),
  Driver(DriverOp),
  Place(PlaceOp),
}

impl ResourceOp {
  /// Parse a method name for a resource kind. Method names are the ones the
  /// mobile SDK uses (`updateActivity`, `captureQrCode`, ...).
  pub fn parse(kind: ResourceKind, method: &str) -> Option<Self> {
    let op = match (kind, method) {
      (ResourceKind::Order, "start") => Self::Order(OrderOp::Start),
      (ResourceKind::Order, "updateActivity") => Self::Order(OrderOp::UpdateActivity),
      (ResourceKind::Order, "setDestination") => Self::Order(OrderOp::SetDestination),
      (ResourceKind::Order, "captureSignature") => Self::Order(OrderOp::CaptureSignature),
      (ResourceKind::Order, "captureQrCode") => Self::Order(OrderOp::CaptureQrCode),
      (ResourceKind::Order, "complete") => Self::Order(OrderOp::Complete),
      (ResourceKind::Driver, "track") => Self::Driver(DriverOp::Track),
      (ResourceKind::Driver, "update") => Self::Driver(DriverOp::Update),
      (ResourceKind::Place, "update") => Self::Place(PlaceOp::Update),
      (ResourceKind::Place, "destroy") => Self::Place(PlaceOp::Destroy),
      _ => return None,
    };
    Some(op)
  }

  pub fn name(&self) -> &'static str {
    match self {
      Self::Order(OrderOp::Start) => "start",
      Self::Order(OrderOp::UpdateActivity) => "updateActivity",
      Self::Order(OrderOp::SetDestination) => "setDestination",
      Self::Order(OrderOp::CaptureSignature) => "captureSignature",
      Self::Order(OrderOp::CaptureQrCode) => "captureQrCode",
      Self::Order(OrderOp::Complete) => "complete",
      Self::Driver(DriverOp::Track) => "track",
      Self::Driver(DriverOp::Update) => "update",
      Self::Place(PlaceOp::Update) => "update",
      Self::Place(PlaceOp::Destroy) => "destroy",
    }
  }

  pub fn kind(&self) -> ResourceKind {
    match self {
      Self::Order(_) => ResourceKind::Order,
      Self::Driver(_) => ResourceKind::Driver,
      Self::Place(_) => ResourceKind::Place,
    }
  }
}

/// Handle to one backend entity.
#[derive(Clone)]
pub struct ResourceHandle {
  kind: ResourceKind,
  id: String,
  adapter: Arc<dyn Adapter>,
}

impl fmt::Debug for ResourceHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResourceHandle")
      .field("kind", &self.kind)
      .field("id", &self.id)
      .finish_non_exhaustive()
  }
}

/// Resolve a handle for a resource. Returns `None` without an id.
pub fn lookup(
  kind: ResourceKind,
  id: Option<&str>,
  adapter: Arc<dyn Adapter>,
) -> Option<ResourceHandle> {
  let id = id.map(str::trim).filter(|id| !id.is_empty())?;
  Some(ResourceHandle {
    kind,
    id: id.to_string(),
    adapter,
  })
}

impl ResourceHandle {
  pub fn kind(&self) -> ResourceKind {
    self.kind
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  /// Path of the entity itself, e.g. `orders/order_42`.
  pub fn path(&self) -> Result<String, AdapterError> {
    Ok(format!("{}/{}", self.kind.collection(), path_segment(&self.id)?))
  }

  /// Verb and endpoint an operation maps to.
  pub fn route(&self, op: ResourceOp, params: &Value) -> Result<(Verb, String), AdapterError> {
    if op.kind() != self.kind {
      return Err(AdapterError::Unsupported(format!(
        "{} is not an operation on {}",
        op.name(),
        self.kind
      )));
    }

    let base = self.path()?;
    let route = match op {
      ResourceOp::Order(OrderOp::Start) => (Verb::Post, format!("{}/start", base)),
      ResourceOp::Order(OrderOp::UpdateActivity) => {
        (Verb::Post, format!("{}/update-activity", base))
      }
      ResourceOp::Order(OrderOp::SetDestination) => {
        let destination = param_str(params, "destination").ok_or_else(|| {
          AdapterError::Unsupported("setDestination requires a destination".to_string())
        })?;
        (Verb::Post, format!("{}/set-destination/{}", base, path_segment(destination)?))
      }
      ResourceOp::Order(OrderOp::CaptureSignature) => {
        (Verb::Post, with_subject(format!("{}/capture-signature", base), params)?)
      }
      ResourceOp::Order(OrderOp::CaptureQrCode) => {
        (Verb::Post, with_subject(format!("{}/capture-qr", base), params)?)
      }
      ResourceOp::Order(OrderOp::Complete) => (Verb::Post, format!("{}/complete", base)),
      ResourceOp::Driver(DriverOp::Track) => (Verb::Post, format!("{}/track", base)),
      ResourceOp::Driver(DriverOp::Update) | ResourceOp::Place(PlaceOp::Update) => (Verb::Put, base),
      ResourceOp::Place(PlaceOp::Destroy) => (Verb::Delete, base),
    };

    Ok(route)
  }

  /// Invoke an operation on this entity.
  pub async fn invoke(&self, op: ResourceOp, params: &Value) -> Result<Value, AdapterError> {
    let (verb, endpoint) = self.route(op, params)?;
    self.adapter.request(verb, &endpoint, params).await
  }
}

fn param_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
  params
    .get(key)
    .and_then(Value::as_str)
    .filter(|s| !s.is_empty())
}

fn with_subject(endpoint: String, params: &Value) -> Result<String, AdapterError> {
  match param_str(params, "subject") {
    Some(subject) => Ok(format!("{}/{}", endpoint, path_segment(subject)?)),
    None => Ok(endpoint),
  }
}

/// Percent-encode a value as a single path segment. Dot segments are
/// rejected since URL resolution collapses them even when encoded.
fn path_segment(value: &str) -> Result<String, AdapterError> {
  if value.is_empty() || value == "." || value == ".." {
    return Err(AdapterError::Unsupported(format!(
      "{:?} is not a valid path segment",
      value
    )));
  }

  // Literal '+' is already encoded as %2B, so any '+' left is a space
  Ok(form_urlencoded::byte_serialize(value.as_bytes()).collect::<String>().replace('+', "%20"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use serde_json::json;

  struct NullAdapter;

  #[async_trait]
  impl Adapter for NullAdapter {
    async fn request(&self, _: Verb, _: &str, _: &Value) -> Result<Value, AdapterError> {
      Ok(Value::Null)
    }
  }

  fn handle(kind: ResourceKind, id: &str) -> ResourceHandle {
    lookup(kind, Some(id), Arc::new(NullAdapter)).unwrap()
  }

  #[test]
  fn test_parse_ops() {
    assert_eq!(
      ResourceOp::parse(ResourceKind::Order, "complete"),
      Some(ResourceOp::Order(OrderOp::Complete))
    );
    assert_eq!(
      ResourceOp::parse(ResourceKind::Driver, "track"),
      Some(ResourceOp::Driver(DriverOp::Track))
    );
    // Method exists on orders but not on places
    assert_eq!(ResourceOp::parse(ResourceKind::Place, "complete"), None);
    assert_eq!(ResourceOp::parse(ResourceKind::Order, "explode"), None);
  }

  #[test]
  fn test_kind_parse() {
    assert_eq!(ResourceKind::parse("Orders"), Some(ResourceKind::Order));
    assert_eq!(ResourceKind::parse("driver"), Some(ResourceKind::Driver));
    assert_eq!(ResourceKind::parse("vehicle"), None);
  }

  #[test]
  fn test_lookup_requires_id() {
    assert!(lookup(ResourceKind::Order, None, Arc::new(NullAdapter)).is_none());
    assert!(lookup(ResourceKind::Order, Some("  "), Arc::new(NullAdapter)).is_none());
  }

  #[test]
  fn test_routes() {
    let order = handle(ResourceKind::Order, "order_42");

    let (verb, endpoint) = order
      .route(ResourceOp::Order(OrderOp::Complete), &json!({}))
      .unwrap();
    assert_eq!(verb, Verb::Post);
    assert_eq!(endpoint, "orders/order_42/complete");

    let (_, endpoint) = order
      .route(
        ResourceOp::Order(OrderOp::SetDestination),
        &json!({"destination": "place_9"}),
      )
      .unwrap();
    assert_eq!(endpoint, "orders/order_42/set-destination/place_9");

    let (_, endpoint) = order
      .route(ResourceOp::Order(OrderOp::CaptureQrCode), &json!({}))
      .unwrap();
    assert_eq!(endpoint, "orders/order_42/capture-qr");

    let place = handle(ResourceKind::Place, "place_1");
    let (verb, endpoint) = place
      .route(ResourceOp::Place(PlaceOp::Destroy), &Value::Null)
      .unwrap();
    assert_eq!(verb, Verb::Delete);
    assert_eq!(endpoint, "places/place_1");
  }

  #[test]
  fn test_route_rejects_mismatched_kind() {
    let driver = handle(ResourceKind::Driver, "driver_1");
    let result = driver.route(ResourceOp::Order(OrderOp::Start), &json!({}));
    assert!(matches!(result, Err(AdapterError::Unsupported(_))));
  }

  #[test]
  fn test_route_values_stay_in_one_segment() {
    let order = handle(ResourceKind::Order, "order 7/x");

    let (_, endpoint) = order
      .route(
        ResourceOp::Order(OrderOp::SetDestination),
        &json!({"destination": "../drivers/1?force=true"}),
      )
      .unwrap();
    assert_eq!(
      endpoint,
      "orders/order%207%2Fx/set-destination/..%2Fdrivers%2F1%3Fforce%3Dtrue"
    );

    let (_, endpoint) = order
      .route(ResourceOp::Order(OrderOp::CaptureQrCode), &json!({"subject": "a+b"}))
      .unwrap();
    assert_eq!(endpoint, "orders/order%207%2Fx/capture-qr/a%2Bb");

    let url = crate::fleet::adapter::endpoint_url("https://api.example.com", &endpoint).unwrap();
    assert_eq!(
      url.as_str(),
      "https://api.example.com/v1/orders/order%207%2Fx/capture-qr/a%2Bb"
    );
  }

  #[test]
  fn test_route_rejects_dot_segments() {
    let order = handle(ResourceKind::Order, "order_42");
    let result = order.route(
      ResourceOp::Order(OrderOp::SetDestination),
      &json!({"destination": ".."}),
    );
    assert!(matches!(result, Err(AdapterError::Unsupported(_))));

    let dots = handle(ResourceKind::Order, ".");
    assert!(dots.route(ResourceOp::Order(OrderOp::Complete), &json!({})).is_err());
  }

  #[test]
  fn test_set_destination_requires_destination() {
    let order = handle(ResourceKind::Order, "order_42");
    let result = order.route(ResourceOp::Order(OrderOp::SetDestination), &json!({}));
    assert!(result.is_err());
  }
}
