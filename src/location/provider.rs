use async_trait::async_trait;
use color_eyre::Result;

use super::types::RawLocation;

/// Platform location services.
#[async_trait]
pub trait LocationProvider: Send + Sync {
  /// One-shot fix of the current position.
  async fn current_position(&self) -> Result<RawLocation>;

  /// Latest position from the continuous (live) feed.
  async fn live_position(&self) -> Result<RawLocation>;

  /// Cached fix held by the platform, without touching the hardware.
  fn last_known_position(&self) -> Option<RawLocation>;
}

/// Provider that always reports one fixed position. Used by the CLI, where
/// the position is given on the command line.
#[derive(Debug, Clone, Copy)]
pub struct StaticProvider {
  position: RawLocation,
}

impl StaticProvider {
  pub fn new(position: RawLocation) -> Self {
    Self { position }
  }
}

#[async_trait]
impl LocationProvider for StaticProvider {
  async fn current_position(&self) -> Result<RawLocation> {
    Ok(self.position)
  }

  async fn live_position(&self) -> Result<RawLocation> {
    Ok(self.position)
  }

  fn last_known_position(&self) -> Option<RawLocation> {
    Some(self.position)
  }
}
