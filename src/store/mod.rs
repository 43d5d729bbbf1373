//! Versioned cache stores for offline response snapshots.
//!
//! This module provides the store abstraction the controller and router are
//! built against:
//! - Named stores mapping request URL -> stored response snapshot
//! - One precache and one runtime store per deployed generation
//! - Cross-store lookup that never touches the network
//! - Bulk teardown of stores left behind by superseded generations

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use traits::{age_display, CacheBackend, CachedResponse};
