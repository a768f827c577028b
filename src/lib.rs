//! Client-side resilience layer for field-operations apps.
//!
//! - [`queue`]: persisted queue of mutating calls made while offline,
//!   replayed in order on reconnect
//! - [`cache`]: TTL cache with in-flight request coalescing for read endpoints
//! - [`location`]: periodic location sampler that only reports real changes
//! - [`connection`]: runtime backend configuration, including deep links
//!
//! [`services::Services`] wires them together once per process.

pub mod cache;
pub mod config;
pub mod connection;
pub mod connectivity;
pub mod event;
pub mod fleet;
pub mod location;
pub mod queue;
pub mod services;
pub mod store;

pub use services::{Services, ServicesHandle};
