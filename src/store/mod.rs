//! Key/value persistence for queue, connection overrides and last-known location.
//!
//! Every persisted value is a string; structured values are stored as JSON.

mod sqlite;

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

pub use sqlite::SqliteStore;

/// Trait for persistence backends.
pub trait KvStore: Send + Sync {
  /// Read a single value.
  fn get(&self, key: &str) -> Result<Option<String>>;

  /// Write a single value.
  fn set(&self, key: &str, value: &str) -> Result<()>;

  /// Write several values atomically. Either all are visible afterwards or none.
  fn set_many(&self, entries: &[(&str, &str)]) -> Result<()>;

  /// Remove a value. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<()>;
}

/// Read and deserialize a JSON value.
pub fn read_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
  match store.get(key)? {
    Some(raw) => serde_json::from_str(&raw)
      .map(Some)
      .map_err(|e| eyre!("Failed to decode stored value {}: {}", key, e)),
    None => Ok(None),
  }
}

/// Serialize and write a JSON value.
pub fn write_json<T: Serialize + ?Sized>(store: &dyn KvStore, key: &str, value: &T) -> Result<()> {
  let raw =
    serde_json::to_string(value).map_err(|e| eyre!("Failed to encode value {}: {}", key, e))?;
  store.set(key, &raw)
}

/// In-memory store. Used for ephemeral sessions and tests.
#[derive(Default)]
pub struct MemoryStore {
  values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KvStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(values.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    self.set_many(&[(key, value)])
  }

  fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
    let mut values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    for (key, value) in entries {
      values.insert((*key).to_string(), (*value).to_string());
    }
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let mut values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    values.remove(key);
    Ok(())
  }
}
