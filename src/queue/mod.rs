//! Persisted queue of mutating calls deferred while offline.
//!
//! Actions are appended in the order the user performed them and replayed in
//! that order once connectivity returns. A replayed action leaves the log
//! immediately; failures end up in a dead-letter list for manual retry.

mod action;
mod action_queue;
mod retry;

pub use action::{Method, QueuedAction};
pub use action_queue::{
  ActionOutcome, ActionQueue, DeadLetter, DrainReport, ReplayGuard, DEAD_LETTER_KEY, QUEUE_KEY,
};
pub use retry::RetryPolicy;
