use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Prefix of order public ids
const ORDER_ID_PREFIX: &str = "order_";

/// Order resource as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
  pub id: String,
  #[serde(default)]
  pub status: String,
  #[serde(default)]
  pub tracking_number: Option<Value>,
  // Everything else the backend sends, kept for subscribers
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Order {
  /// Recognize an order in an arbitrary response body.
  ///
  /// A body is an order when it is an object whose `id` is an order public id,
  /// or whose `type` is `order`.
  pub fn from_response(value: &Value) -> Option<Self> {
    let object = value.as_object()?;
    let id = object.get("id")?.as_str()?;
    let typed_order = object.get("type").and_then(Value::as_str) == Some("order");

    if !id.starts_with(ORDER_ID_PREFIX) && !typed_order {
      return None;
    }

    serde_json::from_value(value.clone()).ok()
  }
}

/// Live tracking progress for an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTracker {
  #[serde(default)]
  pub progress_percentage: f64,
  /// Seconds until the current destination is reached
  pub current_destination_eta: Option<f64>,
  /// Seconds until the whole order is complete
  pub completion_eta: Option<f64>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// ETA in seconds per waypoint id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct OrderEta {
  pub waypoints: BTreeMap<String, f64>,
}

impl OrderEta {
  /// Earliest ETA across waypoints.
  pub fn next(&self) -> Option<(&str, f64)> {
    self
      .waypoints
      .iter()
      .min_by(|a, b| a.1.total_cmp(b.1))
      .map(|(id, secs)| (id.as_str(), *secs))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_recognizes_order_by_id() {
    let body = json!({"id": "order_8Xk2", "status": "completed", "meta": {"a": 1}});
    let order = Order::from_response(&body).unwrap();

    assert_eq!(order.id, "order_8Xk2");
    assert_eq!(order.status, "completed");
    assert_eq!(order.extra.get("meta"), Some(&json!({"a": 1})));
  }

  #[test]
  fn test_recognizes_order_by_type() {
    let body = json!({"id": "42", "type": "order"});
    assert!(Order::from_response(&body).is_some());
  }

  #[test]
  fn test_ignores_other_resources() {
    assert!(Order::from_response(&json!({"id": "driver_1", "status": "online"})).is_none());
    assert!(Order::from_response(&json!({"status": "ok"})).is_none());
    assert!(Order::from_response(&json!([1, 2])).is_none());
    assert!(Order::from_response(&Value::Null).is_none());
  }

  #[test]
  fn test_eta_next() {
    let eta: OrderEta = serde_json::from_value(json!({"place_a": 320.0, "place_b": 95.5})).unwrap();
    assert_eq!(eta.next(), Some(("place_b", 95.5)));
    assert_eq!(OrderEta::default().next(), None);
  }
}
