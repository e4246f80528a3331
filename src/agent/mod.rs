//! The offline cache agent.
//!
//! One agent corresponds to one deployed version. It exposes three async
//! entry points that the hosting runtime awaits to completion:
//! - `on_install`: pre-fetch the manifest into a fresh generation
//! - `on_activate`: drop every other generation and claim open clients
//! - `on_intercept`: answer a request from cache, network or fallback

mod activator;
mod installer;
mod interceptor;
mod policy;

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use url::Url;

use crate::cache::CacheStorage;
use crate::config::{DEFAULT_FALLBACK_DOCUMENT, DEFAULT_MANIFEST};
use crate::fetch::Fetcher;

pub use activator::ActivateReport;
pub use installer::InstallReport;
pub use interceptor::Intercepted;
pub use policy::is_cacheable;

/// Everything that identifies one version of the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
  /// Name of the generation this version owns
  pub cache_name: String,
  /// Origin of the application; relative identifiers resolve against it
  pub origin: Url,
  /// Resource identifiers that must be present after installation
  pub manifest: Vec<String>,
  /// Document served to navigations when the network is unreachable
  pub fallback_document: String,
}

impl AgentConfig {
  /// Config with the built-in manifest and fallback document.
  pub fn new(cache_name: impl Into<String>, origin: Url) -> Self {
    Self {
      cache_name: cache_name.into(),
      origin,
      manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
      fallback_document: DEFAULT_FALLBACK_DOCUMENT.to_string(),
    }
  }

  pub fn with_manifest<I, T>(mut self, manifest: I) -> Self
  where
    I: IntoIterator<Item = T>,
    T: Into<String>,
  {
    self.manifest = manifest.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_fallback_document(mut self, path: impl Into<String>) -> Self {
    self.fallback_document = path.into();
    self
  }

  /// Resolve a root-relative path or absolute URL against the origin.
  pub fn resolve(&self, target: &str) -> Result<Url> {
    self
      .origin
      .join(target)
      .map_err(|e| eyre!("Invalid resource identifier {}: {}", target, e))
  }
}

/// One version of the offline cache agent.
pub struct OfflineAgent<S: CacheStorage, F: Fetcher> {
  config: AgentConfig,
  storage: Arc<S>,
  fetcher: Arc<F>,
  /// Background cache writes started by the interceptor
  pending_writes: Mutex<JoinSet<()>>,
}

impl<S: CacheStorage, F: Fetcher> OfflineAgent<S, F> {
  pub fn new(config: AgentConfig, storage: Arc<S>, fetcher: Arc<F>) -> Self {
    Self {
      config,
      storage,
      fetcher,
      pending_writes: Mutex::new(JoinSet::new()),
    }
  }

  pub fn config(&self) -> &AgentConfig {
    &self.config
  }

  pub fn cache_name(&self) -> &str {
    &self.config.cache_name
  }

  /// Wait for every background cache write started so far.
  ///
  /// Hosts call this before tearing the agent down.
  pub async fn settle(&self) {
    let mut pending = match self.pending_writes.lock() {
      Ok(mut writes) => std::mem::take(&mut *writes),
      Err(_) => return,
    };

    while pending.join_next().await.is_some() {}
  }
}
