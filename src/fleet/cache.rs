//! Cache keys for fleet read endpoints.

use crate::cache::CacheKey;

/// Read endpoints served through the resource cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FleetQueryKey {
  /// Live tracking progress of an order
  OrderTracker { order_id: String },
  /// Per-waypoint ETAs of an order
  OrderEta { order_id: String },
}

impl FleetQueryKey {
  /// Path prefix shared by every key of one order.
  pub fn order_prefix(order_id: &str) -> String {
    format!("orders/{}/", order_id)
  }
}

impl CacheKey for FleetQueryKey {
  fn path(&self) -> String {
    match self {
      Self::OrderTracker { order_id } => format!("orders/{}/tracker", order_id),
      Self::OrderEta { order_id } => format!("orders/{}/eta", order_id),
    }
  }

  fn description(&self) -> String {
    match self {
      Self::OrderTracker { order_id } => format!("tracker for order {}", order_id),
      Self::OrderEta { order_id } => format!("eta for order {}", order_id),
    }
  }
}
