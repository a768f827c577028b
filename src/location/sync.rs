//! Periodic live-location sampler.
//!
//! # Lifecycle
//!
//! ```text
//! readiness:  Initializing ──(first fix)──► Ready
//! phase:      Idle ──(tick)──► Sampling ──(done / failed)──► Idle
//! ```
//!
//! `start()` samples immediately, then on every interval tick. The task is
//! owned by the returned handle: `stop()` ends it after the current step and
//! dropping the handle aborts it, so no tick fires after teardown.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::provider::LocationProvider;
use super::types::{LocationSample, LocationSource, RawLocation};
use crate::event::EventBus;
use crate::store::{read_json, write_json, KvStore};

/// Store key of the last-known location.
pub const LOCATION_KEY: &str = "_current_location";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
  Initializing,
  Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerPhase {
  Idle,
  Sampling,
}

/// Observable sampler state.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
  pub readiness: Readiness,
  pub phase: SamplerPhase,
  /// Error of the most recent failed sample; cleared by the next success
  pub last_error: Option<String>,
  pub last_sample_at: Option<DateTime<Utc>>,
  /// Samples attempted
  pub samples: u64,
  /// Samples that changed the stored location
  pub updates: u64,
}

impl Default for SyncStatus {
  fn default() -> Self {
    Self {
      readiness: Readiness::Initializing,
      phase: SamplerPhase::Idle,
      last_error: None,
      last_sample_at: None,
      samples: 0,
      updates: 0,
    }
  }
}

pub struct LocationSync {
  provider: Arc<dyn LocationProvider>,
  store: Arc<dyn KvStore>,
  events: EventBus,
  interval: Duration,
  timeout: Duration,
  status: watch::Sender<SyncStatus>,
  /// A fix has been obtained during this session
  session_fix: AtomicBool,
}

impl LocationSync {
  pub fn new(
    provider: Arc<dyn LocationProvider>,
    store: Arc<dyn KvStore>,
    events: EventBus,
    interval: Duration,
  ) -> Self {
    let (status, _rx) = watch::channel(SyncStatus::default());
    Self {
      provider,
      store,
      events,
      interval,
      timeout: DEFAULT_TIMEOUT,
      status,
      session_fix: AtomicBool::new(false),
    }
  }

  /// Bound each provider call. Expiry counts as a failed sample.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }

  pub fn status(&self) -> SyncStatus {
    self.status.borrow().clone()
  }

  pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
    self.status.subscribe()
  }

  /// Persisted last-known location, for hydrating the UI on start.
  pub fn last_known(&self) -> Result<Option<LocationSample>> {
    read_json(&*self.store, LOCATION_KEY)
  }

  /// Take one live sample.
  ///
  /// Persists and publishes the sample only when the position changed.
  /// Returns whether it did. A failure is also recorded in the status and
  /// leaves the stored location untouched.
  pub async fn sample(&self) -> Result<bool> {
    self.status.send_modify(|s| {
      s.phase = SamplerPhase::Sampling;
      s.samples += 1;
    });

    let result = match self.bounded(self.provider.live_position()).await {
      Ok(raw) => self.record(LocationSample::from_raw(raw, LocationSource::Live)),
      Err(e) => Err(e),
    };

    self.status.send_modify(|s| {
      s.phase = SamplerPhase::Idle;
      match &result {
        Ok(changed) => {
          s.readiness = Readiness::Ready;
          s.last_error = None;
          s.last_sample_at = Some(Utc::now());
          if *changed {
            s.updates += 1;
          }
        }
        Err(e) => s.last_error = Some(e.to_string()),
      }
    });

    if let Err(e) = &result {
      warn!("Location sample failed: {}", e);
    }

    result
  }

  /// Fetch the current position once per session.
  ///
  /// Later calls in the same session, or calls after the sampler already got
  /// a fix, return the stored location without asking the provider. When the
  /// provider fails, its last-known position is used instead.
  pub async fn initialize_current_location(&self) -> Result<Option<LocationSample>> {
    if self.session_fix.load(Ordering::SeqCst) {
      return self.last_known();
    }

    let raw = match self.bounded(self.provider.current_position()).await {
      Ok(raw) => Some(raw),
      Err(e) => {
        warn!("Current location unavailable, using last known position: {}", e);
        self.provider.last_known_position()
      }
    };

    let Some(raw) = raw else {
      self.status.send_modify(|s| {
        s.last_error = Some("No location available".to_string());
      });
      return self.last_known();
    };

    let sample = LocationSample::from_raw(raw, LocationSource::Current);
    let changed = self.record(sample.clone())?;

    self.status.send_modify(|s| {
      s.readiness = Readiness::Ready;
      s.last_error = None;
      if changed {
        s.updates += 1;
      }
    });

    Ok(Some(sample))
  }

  /// Start the recurring sampler.
  pub fn start(self: &Arc<Self>) -> LocationSyncHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let sync = Arc::clone(self);

    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(sync.interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      info!(interval = ?sync.interval, "Location sync started");

      loop {
        tokio::select! {
          _ = &mut shutdown_rx => break,
          _ = ticker.tick() => {}
        }
        tokio::select! {
          _ = &mut shutdown_rx => break,
          // Failures are already recorded in the status
          _ = sync.sample() => {}
        }
      }

      sync.status.send_modify(|s| s.phase = SamplerPhase::Idle);
      info!("Location sync stopped");
    });

    LocationSyncHandle {
      shutdown: Some(shutdown_tx),
      task: Some(task),
    }
  }

  /// Persist and publish a sample unless it repeats the stored position.
  fn record(&self, sample: LocationSample) -> Result<bool> {
    self.session_fix.store(true, Ordering::SeqCst);

    let previous = match self.last_known() {
      Ok(previous) => previous,
      Err(e) => {
        warn!("Ignoring unreadable stored location: {}", e);
        None
      }
    };

    if previous.is_some_and(|p| p.same_position(&sample)) {
      debug!("Location unchanged");
      return Ok(false);
    }

    write_json(&*self.store, LOCATION_KEY, &sample)?;
    debug!(
      longitude = sample.longitude(),
      latitude = sample.latitude(),
      "Location updated"
    );
    self.events.location_updated.publish(sample);
    Ok(true)
  }

  async fn bounded<F>(&self, request: F) -> Result<RawLocation>
  where
    F: Future<Output = Result<RawLocation>>,
  {
    tokio::time::timeout(self.timeout, request)
      .await
      .map_err(|_| eyre!("Location request timed out after {:?}", self.timeout))?
  }
}

/// Owner of a running sampler task.
pub struct LocationSyncHandle {
  shutdown: Option<oneshot::Sender<()>>,
  task: Option<JoinHandle<()>>,
}

impl LocationSyncHandle {
  /// Stop the sampler and wait for its task to end.
  pub async fn stop(mut self) {
    if let Some(shutdown) = self.shutdown.take() {
      let _ = shutdown.send(());
    }
    if let Some(task) = self.task.take() {
      let _ = task.await;
    }
  }

  pub fn is_running(&self) -> bool {
    self.task.as_ref().is_some_and(|task| !task.is_finished())
  }
}

impl Drop for LocationSyncHandle {
  fn drop(&mut self) {
    if let Some(task) = self.task.take() {
      task.abort();
    }
  }
}
