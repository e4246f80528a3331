use color_eyre::Result;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use super::OfflineAgent;
use crate::cache::CacheStorage;
use crate::fetch::Fetcher;

/// Outcome of activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
  pub cache_name: String,
  /// Stale generations that were removed
  pub deleted: Vec<String>,
  /// Stale generations whose deletion failed and were left behind
  pub orphaned: Vec<String>,
  /// The new version takes over open clients without a reload
  pub claim_clients: bool,
}

impl<S: CacheStorage, F: Fetcher> OfflineAgent<S, F> {
  /// Delete every generation other than this version's.
  ///
  /// Deletions run concurrently and independently; a failed deletion is
  /// reported as orphaned and never fails activation.
  pub async fn on_activate(&self) -> Result<ActivateReport> {
    let cache_name = self.config.cache_name.clone();

    let stale: Vec<String> = self
      .storage
      .keys()?
      .into_iter()
      .filter(|name| *name != cache_name)
      .collect();

    info!(cache = %cache_name, stale = stale.len(), "activating");

    let deletions = stale.into_iter().map(|name| {
      let storage = Arc::clone(&self.storage);
      async move {
        let target = name.clone();
        let outcome = tokio::task::spawn_blocking(move || storage.delete(&target)).await;
        (name, outcome)
      }
    });

    let mut report = ActivateReport {
      cache_name,
      claim_clients: true,
      ..Default::default()
    };

    for (name, outcome) in join_all(deletions).await {
      match outcome {
        Ok(Ok(_)) => {
          info!(cache = %name, "deleted stale generation");
          report.deleted.push(name);
        }
        Ok(Err(e)) => {
          warn!(cache = %name, error = %e, "failed to delete stale generation");
          report.orphaned.push(name);
        }
        Err(e) => {
          warn!(cache = %name, error = %e, "stale generation cleanup aborted");
          report.orphaned.push(name);
        }
      }
    }

    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::agent::AgentConfig;
  use crate::cache::{Generation, SqliteStorage};
  use crate::http::{Request, Response};
  use crate::test_support::{ok_response, origin, request, StubFetcher};
  use color_eyre::eyre::eyre;

  /// Store whose deletions fail for one generation name.
  struct StubbornStorage {
    inner: SqliteStorage,
    stubborn: &'static str,
  }

  impl CacheStorage for StubbornStorage {
    fn keys(&self) -> Result<Vec<String>> {
      self.inner.keys()
    }

    fn generations(&self) -> Result<Vec<Generation>> {
      self.inner.generations()
    }

    fn open(&self, cache_name: &str) -> Result<()> {
      self.inner.open(cache_name)
    }

    fn delete(&self, cache_name: &str) -> Result<bool> {
      if cache_name == self.stubborn {
        return Err(eyre!("database is locked"));
      }
      self.inner.delete(cache_name)
    }

    fn match_request(&self, cache_name: &str, request: &Request) -> Result<Option<Response>> {
      self.inner.match_request(cache_name, request)
    }

    fn put(&self, cache_name: &str, request: &Request, response: &Response) -> Result<()> {
      self.inner.put(cache_name, request, response)
    }

    fn put_all(&self, cache_name: &str, entries: &[(Request, Response)]) -> Result<()> {
      self.inner.put_all(cache_name, entries)
    }
  }

  fn seed<S: CacheStorage>(storage: &S, names: &[&str]) {
    for name in names {
      storage
        .put_all(name, &[(request("/"), ok_response("/", name))])
        .unwrap();
    }
  }

  #[tokio::test]
  async fn test_activate_leaves_only_current_generation() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    seed(&*storage, &["attendance-pwa-v0", "v2", "attendance-pwa-v1"]);
    let agent = OfflineAgent::new(
      AgentConfig::new("v2", origin()),
      Arc::clone(&storage),
      Arc::new(StubFetcher::new()),
    );

    let report = agent.on_activate().await.unwrap();

    assert_eq!(storage.keys().unwrap(), vec!["v2"]);
    assert_eq!(report.deleted.len(), 2);
    assert!(report.orphaned.is_empty());
    assert!(report.claim_clients);
    let cached = storage.match_request("v2", &request("/")).unwrap().unwrap();
    assert_eq!(cached.body, b"v2");
  }

  #[tokio::test]
  async fn test_activate_with_nothing_stale_is_a_no_op() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    seed(&*storage, &["v2"]);
    let agent = OfflineAgent::new(
      AgentConfig::new("v2", origin()),
      Arc::clone(&storage),
      Arc::new(StubFetcher::new()),
    );

    let report = agent.on_activate().await.unwrap();

    assert!(report.deleted.is_empty());
    assert_eq!(storage.keys().unwrap(), vec!["v2"]);
  }

  #[tokio::test]
  async fn test_failed_deletion_does_not_block_the_others() {
    let storage = Arc::new(StubbornStorage {
      inner: SqliteStorage::open_in_memory().unwrap(),
      stubborn: "v0",
    });
    seed(&*storage, &["v0", "v1", "v2"]);
    let agent = OfflineAgent::new(
      AgentConfig::new("v2", origin()),
      Arc::clone(&storage),
      Arc::new(StubFetcher::new()),
    );

    let report = agent.on_activate().await.unwrap();

    assert_eq!(report.deleted, vec!["v1"]);
    assert_eq!(report.orphaned, vec!["v0"]);
    assert_eq!(storage.keys().unwrap(), vec!["v0", "v2"]);
  }
}
