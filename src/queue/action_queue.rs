use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::action::QueuedAction;
use super::retry::RetryPolicy;
use crate::event::{EventBus, ReplayNotice};
use crate::fleet::adapter::{Adapter, AdapterError};
use crate::fleet::types::Order;
use crate::store::{read_json, write_json, KvStore};

/// Store key of the pending action log.
pub const QUEUE_KEY: &str = "_offline_queue";

/// Store key of actions whose replay failed for good.
pub const DEAD_LETTER_KEY: &str = "_offline_queue_dead";

/// A queued action that could not be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
  pub action: QueuedAction,
  pub error: String,
  pub attempts: u32,
  pub failed_at: DateTime<Utc>,
}

/// Result of replaying one action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
  pub action: QueuedAction,
  pub attempts: u32,
  /// `None` on success
  pub error: Option<String>,
}

impl ActionOutcome {
  pub fn succeeded(&self) -> bool {
    self.error.is_none()
  }
}

/// Summary of one drain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
  pub outcomes: Vec<ActionOutcome>,
  /// Order events published for successful replays
  pub orders_synced: usize,
}

impl DrainReport {
  pub fn replayed(&self) -> usize {
    self.outcomes.len()
  }

  pub fn succeeded(&self) -> usize {
    self.outcomes.iter().filter(|o| o.succeeded()).count()
  }

  pub fn dead_lettered(&self) -> usize {
    self.replayed() - self.succeeded()
  }

  /// Attempts beyond the first, summed over all actions.
  pub fn retries(&self) -> u32 {
    self
      .outcomes
      .iter()
      .map(|o| o.attempts.saturating_sub(1))
      .sum()
  }
}

/// Persisted FIFO log of deferred mutating calls.
///
/// The log is stored as one JSON array and always read-modify-written as a
/// whole. Every such write goes through `writer`, so concurrent enqueues and
/// drains never lose entries. `replay` is held for a whole drain; anything
/// sending directly to the backend takes it first so it cannot overtake
/// actions being replayed.
pub struct ActionQueue {
  store: Arc<dyn KvStore>,
  adapter: Arc<dyn Adapter>,
  events: EventBus,
  retry: RetryPolicy,
  writer: Mutex<()>,
  replay: Mutex<()>,
}

/// Exclusive right to talk to the backend in queue order.
pub struct ReplayGuard<'a>(MutexGuard<'a, ()>);

impl ActionQueue {
  pub fn new(
    store: Arc<dyn KvStore>,
    adapter: Arc<dyn Adapter>,
    events: EventBus,
    retry: RetryPolicy,
  ) -> Self {
    Self {
      store,
      adapter,
      events,
      retry,
      writer: Mutex::new(()),
      replay: Mutex::new(()),
    }
  }

  /// Wait for any running drain, then keep others from starting until the
  /// guard is dropped.
  pub async fn hold_replay(&self) -> ReplayGuard<'_> {
    ReplayGuard(self.replay.lock().await)
  }

  /// Append an action to the persisted log.
  pub async fn enqueue(&self, action: QueuedAction) -> Result<()> {
    let _guard = self.writer.lock().await;

    let mut actions = self.load(QUEUE_KEY)?;
    debug!(action = %action, position = actions.len(), "Enqueueing action");
    actions.push(action);
    write_json(&*self.store, QUEUE_KEY, &actions)
  }

  /// Pending actions in enqueue order.
  pub async fn pending(&self) -> Result<Vec<QueuedAction>> {
    let _guard = self.writer.lock().await;
    self.load(QUEUE_KEY)
  }

  pub async fn len(&self) -> Result<usize> {
    Ok(self.pending().await?.len())
  }

  pub async fn is_empty(&self) -> Result<bool> {
    Ok(self.len().await? == 0)
  }

  /// Replay every pending action, in enqueue order, one at a time.
  ///
  /// The persisted log is emptied before the first replay, so overlapping
  /// drains never process an action twice and a replayed action is never
  /// re-inserted. Transient failures are retried per the retry policy; an
  /// action that still fails is moved to the dead-letter list.
  pub async fn drain(&self) -> Result<DrainReport> {
    let guard = self.hold_replay().await;
    self.drain_held(&guard).await
  }

  /// Drain while already holding the replay guard.
  pub async fn drain_held(&self, _replay: &ReplayGuard<'_>) -> Result<DrainReport> {
    let actions = {
      let _guard = self.writer.lock().await;
      let actions = self.load(QUEUE_KEY)?;
      write_json(&*self.store, QUEUE_KEY, &Vec::<QueuedAction>::new())?;
      actions
    };

    let mut report = DrainReport::default();
    if actions.is_empty() {
      debug!("Nothing to replay");
      return Ok(report);
    }

    info!(count = actions.len(), "Replaying queued actions");

    for action in actions {
      let (attempts, result) = self.replay(&action).await;

      let outcome = match result {
        Ok(response) => {
          if let Some(order) = Order::from_response(&response) {
            debug!(order_id = %order.id, "Order synced");
            self.events.order_synced.publish(order);
            report.orders_synced += 1;
          }
          self.notify(&action, true, "Synced".to_string());
          ActionOutcome {
            action,
            attempts,
            error: None,
          }
        }
        Err(err) => {
          warn!(action = %action, attempts, error = %err, "Replay failed, dead-lettering action");
          let mut error = err.to_string();
          // The log is already cleared, so the rest of the batch must still run
          if let Err(e) = self.dead_letter(&action, &err, attempts).await {
            warn!(action = %action, "Failed to record dead letter: {}", e);
            error = format!("{} (dead letter not recorded: {})", error, e);
          }
          self.notify(&action, false, error.clone());
          ActionOutcome {
            action,
            attempts,
            error: Some(error),
          }
        }
      };

      report.outcomes.push(outcome);
    }

    info!(
      replayed = report.replayed(),
      succeeded = report.succeeded(),
      dead_lettered = report.dead_lettered(),
      retries = report.retries(),
      "Queue drained"
    );

    Ok(report)
  }

  /// Replay one action, retrying transient failures.
  async fn replay(&self, action: &QueuedAction) -> (u32, Result<Value, AdapterError>) {
    let mut attempt = 1;
    loop {
      match action.execute(&self.adapter).await {
        Ok(value) => return (attempt, Ok(value)),
        Err(err) if err.is_transient() && self.retry.allows_retry_after(attempt) => {
          let delay = self.retry.delay_after(attempt);
          debug!(action = %action, attempt, ?delay, error = %err, "Retrying replay");
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        Err(err) => return (attempt, Err(err)),
      }
    }
  }

  fn notify(&self, action: &QueuedAction, success: bool, message: String) {
    self.events.replay.publish(ReplayNotice {
      action: action.to_string(),
      success,
      message,
    });
  }

  async fn dead_letter(&self, action: &QueuedAction, err: &AdapterError, attempts: u32) -> Result<()> {
    let _guard = self.writer.lock().await;

    let mut dead: Vec<DeadLetter> = read_json(&*self.store, DEAD_LETTER_KEY)?.unwrap_or_default();
    dead.push(DeadLetter {
      action: action.clone(),
      error: err.to_string(),
      attempts,
      failed_at: Utc::now(),
    });
    write_json(&*self.store, DEAD_LETTER_KEY, &dead)
  }

  /// Actions whose replay failed, oldest first.
  pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
    let _guard = self.writer.lock().await;
    Ok(read_json(&*self.store, DEAD_LETTER_KEY)?.unwrap_or_default())
  }

  /// Move every dead letter back to the end of the pending log, in the order
  /// they failed. Returns how many were re-queued.
  pub async fn retry_dead_letters(&self) -> Result<usize> {
    let _guard = self.writer.lock().await;

    let dead: Vec<DeadLetter> = read_json(&*self.store, DEAD_LETTER_KEY)?.unwrap_or_default();
    if dead.is_empty() {
      return Ok(0);
    }

    let mut actions = self.load(QUEUE_KEY)?;
    let count = dead.len();
    actions.extend(dead.into_iter().map(|letter| letter.action));

    let pending = serde_json::to_string(&actions)
      .map_err(|e| eyre!("Failed to serialize action queue: {}", e))?;
    self
      .store
      .set_many(&[(QUEUE_KEY, pending.as_str()), (DEAD_LETTER_KEY, "[]")])?;

    info!(count, "Re-queued dead letters");
    Ok(count)
  }

  /// Forget every dead letter. Returns how many were dropped.
  pub async fn clear_dead_letters(&self) -> Result<usize> {
    let _guard = self.writer.lock().await;

    let dead: Vec<DeadLetter> = read_json(&*self.store, DEAD_LETTER_KEY)?.unwrap_or_default();
    write_json(&*self.store, DEAD_LETTER_KEY, &Vec::<DeadLetter>::new())?;
    Ok(dead.len())
  }

  /// Load a persisted action log, skipping entries that no longer parse.
  fn load(&self, key: &str) -> Result<Vec<QueuedAction>> {
    let raw: Vec<Value> = read_json(&*self.store, key)?.unwrap_or_default();

    Ok(
      raw
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
          Ok(action) => Some(action),
          Err(e) => {
            warn!(key, "Dropping unreadable queued action: {}", e);
            None
          }
        })
        .collect(),
    )
  }
}
