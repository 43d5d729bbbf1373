//! In-memory cache backend.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};

use super::traits::{CacheBackend, CachedResponse};

/// Non-persistent backend. Stores live for the lifetime of the process and
/// are shared across tasks via `Arc<MemoryBackend>`.
#[derive(Default)]
pub struct MemoryBackend {
  inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
  /// Store names in creation order; lookups check older stores first.
  order: Vec<String>,
  stores: HashMap<String, HashMap<String, CachedResponse>>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
    self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheBackend for MemoryBackend {
  fn open(&self, name: &str) -> Result<()> {
    let mut inner = self.lock()?;

    if !inner.stores.contains_key(name) {
      inner.order.push(name.to_string());
      inner.stores.insert(name.to_string(), HashMap::new());
    }

    Ok(())
  }

  fn put(&self, store: &str, key: &str, entry: &CachedResponse) -> Result<()> {
    let mut inner = self.lock()?;

    let entries = inner
      .stores
      .get_mut(store)
      .ok_or_else(|| eyre!("no such cache store: {}", store))?;
    entries.insert(key.to_string(), entry.clone());

    Ok(())
  }

  fn lookup(&self, key: &str) -> Result<Option<CachedResponse>> {
    let inner = self.lock()?;

    for name in &inner.order {
      if let Some(entry) = inner.stores.get(name).and_then(|entries| entries.get(key)) {
        return Ok(Some(entry.clone()));
      }
    }

    Ok(None)
  }

  fn store_names(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.order.clone())
  }

  fn delete_store(&self, name: &str) -> Result<()> {
    let mut inner = self.lock()?;

    inner.stores.remove(name);
    inner.order.retain(|n| n != name);

    Ok(())
  }

  fn entry_count(&self, store: &str) -> Result<usize> {
    Ok(
      self
        .lock()?
        .stores
        .get(store)
        .map(|entries| entries.len())
        .unwrap_or(0),
    )
  }

  fn latest_stored_at(&self, store: &str) -> Result<Option<DateTime<Utc>>> {
    Ok(
      self
        .lock()?
        .stores
        .get(store)
        .and_then(|entries| entries.values().map(|entry| entry.stored_at).max()),
    )
  }
}
