//! Core trait and types for the cache stores.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use color_eyre::Result;
use tracing::warn;

use crate::fetch::FetchedResponse;

/// A response snapshot held by a cache store, with the time it was stored.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: FetchedResponse,
  pub stored_at: DateTime<Utc>,
}

impl CachedResponse {
  pub fn new(response: FetchedResponse) -> Self {
    Self {
      response,
      stored_at: Utc::now(),
    }
  }
}

/// Backend owning the named cache stores.
///
/// Implementations serialize access internally; the controller and router
/// share one backend across request tasks via `Arc`.
pub trait CacheBackend: Send + Sync {
  /// Idempotently create the named store.
  fn open(&self, name: &str) -> Result<()>;

  /// Store a snapshot keyed by request URL, overwriting any existing entry
  /// for that key. Fails if the store has not been opened.
  fn put(&self, store: &str, key: &str, entry: &CachedResponse) -> Result<()>;

  /// Search every store for an entry with this key, oldest store first.
  /// Never consults the network.
  fn lookup(&self, key: &str) -> Result<Option<CachedResponse>>;

  /// Names of all existing stores, in creation order.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Remove a store and all of its entries.
  fn delete_store(&self, name: &str) -> Result<()>;

  /// Number of entries in the named store (zero if the store is absent).
  fn entry_count(&self, store: &str) -> Result<usize>;

  /// Timestamp of the most recently stored entry, if any.
  fn latest_stored_at(&self, store: &str) -> Result<Option<DateTime<Utc>>>;

  /// Delete every store whose name is not in `keep`, returning the names
  /// that were removed. Cleanup is best-effort: individual deletion
  /// failures are logged and skipped, never fatal.
  fn delete_stores_except(&self, keep: &BTreeSet<String>) -> Result<Vec<String>> {
    let mut removed = Vec::new();

    for name in self.store_names()? {
      if keep.contains(&name) {
        continue;
      }
      match self.delete_store(&name) {
        Ok(()) => removed.push(name),
        Err(err) => {
          warn!(store = %name, error = %err, "failed to delete stale cache store");
        }
      }
    }

    Ok(removed)
  }
}

/// Human-readable age for status output.
pub fn age_display(stored_at: DateTime<Utc>) -> String {
  let minutes = (Utc::now() - stored_at).num_minutes();

  if minutes < 1 {
    // also covers clock skew
    "just now".to_string()
  } else if minutes < 60 {
    format!("{}m ago", minutes)
  } else if minutes < 1440 {
    format!("{}h ago", minutes / 60)
  } else {
    format!("{}d ago", minutes / 1440)
  }
}
