//! Versioned generation store for response snapshots.
//!
//! This module provides the storage side of the agent:
//! - Named generations, one per deployed agent version
//! - Request identity (method + URL) to response snapshot mapping
//! - All-or-nothing bulk writes for installation

mod storage;
mod traits;

pub use storage::SqliteStorage;
pub use traits::{CacheStorage, Generation};
