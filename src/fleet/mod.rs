//! Backend access: generic verb adapter, typed resource handles and cached
//! read endpoints.

pub mod adapter;
pub mod cache;
pub mod cached_client;
pub mod resource;
pub mod types;

pub use adapter::{Adapter, AdapterError, HttpAdapter, Verb};
pub use cached_client::FleetClient;
pub use resource::{lookup, ResourceHandle, ResourceKind, ResourceOp};
