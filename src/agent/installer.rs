use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::collections::HashSet;
use tracing::{info, warn};

use super::OfflineAgent;
use crate::cache::CacheStorage;
use crate::fetch::Fetcher;
use crate::http::Request;

/// Outcome of a successful installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub cache_name: String,
  /// Number of manifest entries written
  pub stored: usize,
  /// The new version does not wait for old clients to close
  pub skip_waiting: bool,
}

impl<S: CacheStorage, F: Fetcher> OfflineAgent<S, F> {
  /// Fetch every manifest entry and store them into this version's
  /// generation.
  ///
  /// If any entry cannot be fetched, or answers with a non-2xx status, the
  /// whole installation fails and nothing is written. A manifest naming the
  /// same request twice is rejected before anything is fetched.
  pub async fn on_install(&self) -> Result<InstallReport> {
    let cache_name = &self.config.cache_name;

    let requests = self
      .config
      .manifest
      .iter()
      .map(|entry| self.config.resolve(entry).map(Request::get))
      .collect::<Result<Vec<_>>>()?;

    let mut seen = HashSet::with_capacity(requests.len());
    if let Some(dup) = requests.iter().find(|r| !seen.insert(r.cache_key())) {
      warn!(cache = %cache_name, url = %dup.url, "duplicate manifest entry");
      return Err(eyre!("Manifest lists {} more than once", dup.url));
    }

    info!(cache = %cache_name, entries = requests.len(), "installing");

    let entries = try_join_all(requests.into_iter().map(|request| async move {
      let response = self.fetcher.fetch(&request).await?;
      if !response.ok() {
        return Err(eyre!(
          "Manifest entry {} answered with status {}",
          request.url,
          response.status
        ));
      }
      Ok::<_, color_eyre::Report>((request, response))
    }))
    .await
    .map_err(|e| {
      warn!(cache = %cache_name, error = %e, "install failed");
      e
    })?;

    self.storage.put_all(cache_name, &entries)?;

    info!(cache = %cache_name, stored = entries.len(), "installed");

    Ok(InstallReport {
      cache_name: cache_name.clone(),
      stored: entries.len(),
      skip_waiting: true,
    })
  }
}

#[cfg(test)]
mod tests {
  use ::url::Url;
  use std::sync::Arc;

  use super::*;
  use crate::agent::AgentConfig;
  use crate::cache::SqliteStorage;
  use crate::http::ResponseType;
  use crate::test_support::{origin, request, response, url, StubFetcher};

  fn agent(
    manifest: &[&str],
    fetcher: StubFetcher,
  ) -> (OfflineAgent<SqliteStorage, StubFetcher>, Arc<SqliteStorage>) {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let config = AgentConfig::new("v2", origin()).with_manifest(manifest.iter().copied());
    let agent = OfflineAgent::new(config, Arc::clone(&storage), Arc::new(fetcher));
    (agent, storage)
  }

  #[tokio::test]
  async fn test_install_stores_every_manifest_entry() {
    let fetcher = StubFetcher::new()
      .serve("/", "root")
      .serve("/index.html", "index");
    let (agent, storage) = agent(&["/", "/index.html"], fetcher);

    let report = agent.on_install().await.unwrap();

    assert_eq!(report.cache_name, "v2");
    assert_eq!(report.stored, 2);
    assert!(report.skip_waiting);
    let generations = storage.generations().unwrap();
    assert_eq!(generations.len(), 1);
    assert_eq!(generations[0].entries, 2);
  }

  #[tokio::test]
  async fn test_install_with_unreachable_entry_stores_nothing() {
    let fetcher = StubFetcher::new().serve("/", "root");
    let (agent, storage) = agent(&["/", "/manifest.json"], fetcher);

    assert!(agent.on_install().await.is_err());

    assert!(storage.keys().unwrap().is_empty());
    assert_eq!(storage.match_request("v2", &request("/")).unwrap(), None);
  }

  #[tokio::test]
  async fn test_install_rejects_error_status() {
    let fetcher = StubFetcher::new().serve("/", "root").route(
      &url("/icon-192.png"),
      response(url("/icon-192.png").as_str(), 404, "", ResponseType::Basic),
    );
    let (agent, storage) = agent(&["/", "/icon-192.png"], fetcher);

    let err = agent.on_install().await.unwrap_err();

    assert!(err.to_string().contains("404"));
    assert!(storage.keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_rejects_duplicate_entries() {
    let fetcher = Arc::new(
      StubFetcher::new()
        .serve("/", "root")
        .serve("/index.html", "index"),
    );
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    // Same resource, once relative and once absolute with a fragment
    let manifest = ["/", "/index.html", "https://attendance.example/index.html#top"];
    let config = AgentConfig::new("v2", origin()).with_manifest(manifest);
    let agent = OfflineAgent::new(config, Arc::clone(&storage), Arc::clone(&fetcher));

    let err = agent.on_install().await.unwrap_err();

    assert!(err.to_string().contains("more than once"));
    assert_eq!(fetcher.calls(), 0);
    assert!(storage.keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_accepts_cross_origin_entries() {
    let font = "https://fonts.googleapis.com/css2?family=Roboto";
    let font_url = Url::parse(font).unwrap();
    let fetcher = StubFetcher::new()
      .serve("/", "root")
      .route(&font_url, response(font, 200, "@font-face{}", ResponseType::Cors));
    let (agent, storage) = agent(&["/", font], fetcher);

    agent.on_install().await.unwrap();

    let cached = storage
      .match_request("v2", &Request::get(font_url))
      .unwrap()
      .unwrap();
    assert_eq!(cached.response_type, ResponseType::Cors);
  }
}
