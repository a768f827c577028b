//! Online/offline tracking and reconnect-triggered queue replay.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::fleet::adapter::Adapter;
use crate::queue::{ActionQueue, DrainReport, QueuedAction};

/// Shared connectivity state. Clones observe and update the same state.
#[derive(Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  /// Report the platform's current state. Repeating the current state is a
  /// no-op for observers.
  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });
    if changed {
      info!(online, "Connectivity changed");
    }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

/// Detects offline -> online transitions in a stream of observations.
///
/// The state before the first observation counts as offline, so being online
/// at startup is one transition and replays what a previous session queued.
#[derive(Debug, Default)]
pub struct TransitionDetector {
  online: bool,
}

impl TransitionDetector {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record an observation. Returns true exactly when it is a reconnect.
  pub fn observe(&mut self, online: bool) -> bool {
    let reconnected = online && !self.online;
    self.online = online;
    reconnected
  }
}

/// Replay the action queue once per reconnect.
///
/// Drains run on the returned task one at a time. Aborting the task, or
/// dropping every `Connectivity` clone, stops it.
pub fn drain_on_reconnect(connectivity: &Connectivity, queue: Arc<ActionQueue>) -> JoinHandle<()> {
  let mut rx = connectivity.subscribe();

  tokio::spawn(async move {
    let mut detector = TransitionDetector::new();

    loop {
      let online = *rx.borrow_and_update();
      if detector.observe(online) {
        debug!("Reconnected, draining action queue");
        match queue.drain().await {
          Ok(report) if report.replayed() > 0 => info!(
            replayed = report.replayed(),
            succeeded = report.succeeded(),
            "Reconnect replay finished"
          ),
          Ok(_) => {}
          Err(e) => warn!("Failed to drain action queue: {}", e),
        }
      }

      if rx.changed().await.is_err() {
        break;
      }
      // Only real flips notify. Seeing `true` after a notification means the
      // state went offline in between, even if that value was coalesced away.
      if *rx.borrow() {
        detector.observe(false);
      }
    }
  })
}

/// Result of dispatching a mutating call.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
  /// Sent to the backend; carries the response body
  Sent(Value),
  /// Deferred to the action queue until connectivity returns
  Queued,
  /// Earlier actions were still pending, so this one was appended and the
  /// whole queue replayed in order
  Replayed(DrainReport),
}

/// Sends mutating calls, deferring them to the queue when offline.
#[derive(Clone)]
pub struct Dispatcher {
  adapter: Arc<dyn Adapter>,
  queue: Arc<ActionQueue>,
  connectivity: Connectivity,
}

impl Dispatcher {
  pub fn new(adapter: Arc<dyn Adapter>, queue: Arc<ActionQueue>, connectivity: Connectivity) -> Self {
    Self {
      adapter,
      queue,
      connectivity,
    }
  }

  /// Send an action now, or queue it if the backend is unreachable.
  ///
  /// Actions reach the backend in the order they were dispatched: while a
  /// replay runs this waits for it, and if actions are still queued this one
  /// goes behind them and the queue is replayed. A call that fails for lack
  /// of connectivity marks the client offline, so the next online report
  /// triggers a replay. Backend rejections are returned as errors and not
  /// queued.
  pub async fn dispatch(&self, action: QueuedAction) -> Result<Dispatch> {
    if !self.connectivity.is_online() {
      debug!(action = %action, "Offline, queueing action");
      self.queue.enqueue(action).await?;
      return Ok(Dispatch::Queued);
    }

    let replay = self.queue.hold_replay().await;
    if !self.queue.is_empty().await? {
      debug!(action = %action, "Earlier actions pending, replaying in order");
      self.queue.enqueue(action).await?;
      let report = self.queue.drain_held(&replay).await?;
      return Ok(Dispatch::Replayed(report));
    }

    match action.execute(&self.adapter).await {
      Ok(value) => Ok(Dispatch::Sent(value)),
      Err(err) if err.is_connectivity() => {
        warn!(action = %action, error = %err, "Backend unreachable, queueing action");
        self.connectivity.set_online(false);
        self.queue.enqueue(action).await?;
        Ok(Dispatch::Queued)
      }
      Err(err) => Err(eyre!("{} failed: {}", action, err)),
    }
  }
}
