//! Device location sampling and change reporting.

mod provider;
mod sync;
mod types;

pub use provider::{LocationProvider, StaticProvider};
pub use sync::{LocationSync, LocationSyncHandle, Readiness, SamplerPhase, SyncStatus, LOCATION_KEY};
pub use types::{LocationSample, LocationSource, RawLocation};
