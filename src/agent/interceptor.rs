use color_eyre::Report;
use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, warn};

use super::policy::is_cacheable;
use super::OfflineAgent;
use crate::cache::CacheStorage;
use crate::fetch::Fetcher;
use crate::http::{Request, Response};

/// How an intercepted request was answered.
#[derive(Debug)]
pub enum Intercepted {
  /// Stored snapshot from the current generation
  Cached(Response),
  /// Live network response
  Network(Response),
  /// Network failed on a navigation; the cached fallback document stands in
  OfflineFallback(Response),
  /// Network failed and there is nothing to substitute
  Unavailable(Report),
}

impl Intercepted {
  pub fn response(&self) -> Option<&Response> {
    match self {
      Intercepted::Cached(r) | Intercepted::Network(r) | Intercepted::OfflineFallback(r) => Some(r),
      Intercepted::Unavailable(_) => None,
    }
  }

  /// Short label for where the answer came from.
  pub fn source(&self) -> &'static str {
    match self {
      Intercepted::Cached(_) => "cache",
      Intercepted::Network(_) => "network",
      Intercepted::OfflineFallback(_) => "offline-fallback",
      Intercepted::Unavailable(_) => "unavailable",
    }
  }
}

impl<S: CacheStorage, F: Fetcher> OfflineAgent<S, F> {
  /// Answer one request: cache first, then network, then offline fallback.
  ///
  /// Cached entries are served verbatim with no revalidation. Cacheable
  /// network responses are written back in the background; the caller never
  /// waits for that write and its failure is ignored.
  pub async fn on_intercept(&self, request: Request) -> Intercepted {
    if let Some(cached) = self.lookup(&request) {
      debug!(url = %request.url, "served from cache");
      return Intercepted::Cached(cached);
    }

    match self.fetcher.fetch(&request).await {
      Ok(response) => {
        if request.method == Method::GET && is_cacheable(&response) {
          self.store_in_background(request, response.clone());
        } else {
          debug!(
            url = %request.url,
            status = response.status,
            kind = %response.response_type,
            "not caching network response"
          );
        }
        Intercepted::Network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network unavailable");
        if request.is_navigation() {
          if let Some(document) = self.fallback_document() {
            return Intercepted::OfflineFallback(document);
          }
        }
        Intercepted::Unavailable(e)
      }
    }
  }

  /// Exact match in the current generation. Storage faults count as a miss.
  fn lookup(&self, request: &Request) -> Option<Response> {
    self
      .storage
      .match_request(&self.config.cache_name, request)
      .unwrap_or_else(|e| {
        warn!(url = %request.url, error = %e, "cache lookup failed");
        None
      })
  }

  fn fallback_document(&self) -> Option<Response> {
    let url = match self.config.resolve(&self.config.fallback_document) {
      Ok(url) => url,
      Err(e) => {
        warn!(error = %e, "invalid fallback document");
        return None;
      }
    };
    self.lookup(&Request::get(url))
  }

  fn store_in_background(&self, request: Request, response: Response) {
    let storage = Arc::clone(&self.storage);
    let cache_name = self.config.cache_name.clone();

    let Ok(mut pending) = self.pending_writes.lock() else {
      return;
    };
    // Reap writes that already finished
    while pending.try_join_next().is_some() {}

    pending.spawn_blocking(move || match storage.put(&cache_name, &request, &response) {
      Ok(()) => debug!(cache = %cache_name, url = %request.url, "cached network response"),
      Err(e) => debug!(cache = %cache_name, url = %request.url, error = %e, "cache write dropped"),
    });
  }
}
