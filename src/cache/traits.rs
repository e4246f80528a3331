//! Core traits and types for the generation store.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::http::{Request, Response};

/// Summary of one cache generation.
#[derive(Debug, Clone)]
pub struct Generation {
  /// Generation name (the agent's version identifier)
  pub name: String,
  /// When the generation was first opened
  pub created_at: DateTime<Utc>,
  /// Number of stored request/response pairs
  pub entries: usize,
}

/// Trait for cache storage backends.
///
/// A backend holds any number of named generations, each mapping request
/// identity to a response snapshot. Implementations must be safe to share
/// between concurrently running tasks.
pub trait CacheStorage: Send + Sync + 'static {
  /// Names of all existing generations, oldest first.
  fn keys(&self) -> Result<Vec<String>>;

  /// Describe all existing generations, oldest first.
  fn generations(&self) -> Result<Vec<Generation>>;

  /// Create the named generation if it does not exist yet.
  fn open(&self, cache_name: &str) -> Result<()>;

  /// Delete a generation and everything in it.
  /// Returns false if there was nothing to delete.
  fn delete(&self, cache_name: &str) -> Result<bool>;

  /// Look up the stored snapshot for a request.
  fn match_request(&self, cache_name: &str, request: &Request) -> Result<Option<Response>>;

  /// Store one snapshot into an existing generation.
  ///
  /// Fails if the generation does not exist; writes never recreate a
  /// deleted generation.
  fn put(&self, cache_name: &str, request: &Request, response: &Response) -> Result<()>;

  /// Create the generation if needed and store every pair, all or nothing.
  fn put_all(&self, cache_name: &str, entries: &[(Request, Response)]) -> Result<()>;
}
