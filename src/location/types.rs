use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position as reported by the platform location provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawLocation {
  pub longitude: f64,
  pub latitude: f64,
  /// Horizontal accuracy in meters, if known
  #[serde(default)]
  pub accuracy: Option<f64>,
  /// When the provider took the fix; sampling time is used otherwise
  #[serde(default)]
  pub timestamp: Option<DateTime<Utc>>,
}

impl RawLocation {
  pub fn new(longitude: f64, latitude: f64) -> Self {
    Self {
      longitude,
      latitude,
      accuracy: None,
      timestamp: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
  Current,
  Live,
}

/// Persisted last-known location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
  /// `[longitude, latitude]`
  pub coordinates: [f64; 2],
  pub captured_at: DateTime<Utc>,
  pub source: LocationSource,
}

impl LocationSample {
  pub fn from_raw(raw: RawLocation, source: LocationSource) -> Self {
    Self {
      coordinates: [raw.longitude, raw.latitude],
      captured_at: raw.timestamp.unwrap_or_else(Utc::now),
      source,
    }
  }

  pub fn longitude(&self) -> f64 {
    self.coordinates[0]
  }

  pub fn latitude(&self) -> f64 {
    self.coordinates[1]
  }

  /// Same position, regardless of capture time or source.
  pub fn same_position(&self, other: &LocationSample) -> bool {
    self.coordinates == other.coordinates
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_same_position_ignores_time_and_source() {
    let a = LocationSample::from_raw(RawLocation::new(101.68, 3.14), LocationSource::Current);
    let mut b = LocationSample::from_raw(RawLocation::new(101.68, 3.14), LocationSource::Live);
    b.captured_at = a.captured_at + chrono::Duration::minutes(5);

    assert!(a.same_position(&b));
    assert_ne!(a, b);

    let c = LocationSample::from_raw(RawLocation::new(101.68, 3.15), LocationSource::Live);
    assert!(!a.same_position(&c));
  }

  #[test]
  fn test_persisted_shape() {
    let sample = LocationSample::from_raw(RawLocation::new(1.5, 2.5), LocationSource::Live);
    let value = serde_json::to_value(&sample).unwrap();

    assert_eq!(value["coordinates"], serde_json::json!([1.5, 2.5]));
    assert_eq!(value["source"], "live");
    assert!(value.get("capturedAt").is_some());
  }
}
