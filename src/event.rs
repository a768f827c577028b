//! Typed in-process publish/subscribe channels.
//!
//! One channel per event kind. Publishing is synchronous: the event is handed
//! to every receiver subscribed at that moment, at most once. Receivers attach
//! with `subscribe()` and detach by dropping the receiver.

use tokio::sync::broadcast;
use tracing::trace;

use crate::connection::ConnectionConfig;
use crate::fleet::types::Order;
use crate::location::LocationSample;

/// Buffered events per subscriber before lagging receivers start losing events.
const CHANNEL_CAPACITY: usize = 64;

/// A single typed event channel.
#[derive(Debug)]
pub struct Channel<T: Clone> {
  name: &'static str,
  tx: broadcast::Sender<T>,
}

impl<T: Clone> Channel<T> {
  fn new(name: &'static str) -> Self {
    let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
    Self { name, tx }
  }

  /// Deliver an event to current subscribers. Returns how many received it.
  pub fn publish(&self, event: T) -> usize {
    let delivered = self.tx.send(event).unwrap_or(0);
    trace!(event = self.name, delivered, "Published event");
    delivered
  }

  pub fn subscribe(&self) -> broadcast::Receiver<T> {
    self.tx.subscribe()
  }

  pub fn subscriber_count(&self) -> usize {
    self.tx.receiver_count()
  }

  pub fn name(&self) -> &'static str {
    self.name
  }
}

impl<T: Clone> Clone for Channel<T> {
  fn clone(&self) -> Self {
    Self {
      name: self.name,
      tx: self.tx.clone(),
    }
  }
}

/// Transient user notification about one replayed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayNotice {
  pub action: String,
  pub success: bool,
  pub message: String,
}

/// Signal that the backend endpoint changed.
///
/// Receivers reset navigation to the boot entry point; the persisted identity
/// and the resource cache have already been cleared when this is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigReset {
  pub config: ConnectionConfig,
}

/// All application event channels. Cloning shares the same channels.
#[derive(Debug, Clone)]
pub struct EventBus {
  /// `order.synced`: an order returned by a replayed queued action
  pub order_synced: Channel<Order>,
  /// `current_location.updated`: the persisted location changed
  pub location_updated: Channel<LocationSample>,
  pub replay: Channel<ReplayNotice>,
  pub config_reset: Channel<ConfigReset>,
}

impl EventBus {
  pub fn new() -> Self {
    Self {
      order_synced: Channel::new("order.synced"),
      location_updated: Channel::new("current_location.updated"),
      replay: Channel::new("replay"),
      config_reset: Channel::new("config.reset"),
    }
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn notice(action: &str) -> ReplayNotice {
    ReplayNotice {
      action: action.to_string(),
      success: true,
      message: "ok".to_string(),
    }
  }

  #[test]
  fn test_publish_without_subscribers() {
    let bus = EventBus::new();
    assert_eq!(bus.replay.publish(notice("post orders/1")), 0);
  }

  #[tokio::test]
  async fn test_subscribers_receive_events_published_after_attach() {
    let bus = EventBus::new();
    bus.replay.publish(notice("before"));

    let mut rx = bus.replay.subscribe();
    let other = bus.clone();
    assert_eq!(other.replay.publish(notice("after")), 1);

    assert_eq!(rx.recv().await.unwrap().action, "after");
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn test_detach_by_drop() {
    let bus = EventBus::new();
    let rx = bus.config_reset.subscribe();
    assert_eq!(bus.config_reset.subscriber_count(), 1);

    drop(rx);
    assert_eq!(bus.config_reset.subscriber_count(), 0);
  }
}
