//! Hosting runtime for agent versions.
//!
//! A `Registration` plays the browser's part: it installs newly registered
//! versions, activates them, and routes requests to whichever version is
//! currently in control.

use color_eyre::{eyre::eyre, Result};
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::agent::{Intercepted, OfflineAgent};
use crate::cache::CacheStorage;
use crate::fetch::Fetcher;
use crate::http::Request;

/// Lifecycle state of the most recently registered version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Install step in progress
  Installing,
  /// Installed, waiting for old clients to go away
  Installed,
  /// Activate step in progress
  Activating,
  /// In control of requests
  Activated,
  /// Failed to install, or replaced
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Installed => write!(f, "installed"),
      WorkerState::Activating => write!(f, "activating"),
      WorkerState::Activated => write!(f, "activated"),
      WorkerState::Redundant => write!(f, "redundant"),
    }
  }
}

struct Slots<S: CacheStorage, F: Fetcher> {
  active: Option<Arc<OfflineAgent<S, F>>>,
  waiting: Option<Arc<OfflineAgent<S, F>>>,
  state: Option<WorkerState>,
}

/// Registration of an offline agent for one application origin.
pub struct Registration<S: CacheStorage, F: Fetcher> {
  /// Used directly when no version is in control
  fetcher: Arc<F>,
  slots: RwLock<Slots<S, F>>,
}

impl<S: CacheStorage, F: Fetcher> Registration<S, F> {
  pub fn new(fetcher: Arc<F>) -> Self {
    Self {
      fetcher,
      slots: RwLock::new(Slots {
        active: None,
        waiting: None,
        state: None,
      }),
    }
  }

  /// State of the latest registered version, if any.
  pub fn state(&self) -> Option<WorkerState> {
    self.slots.read().ok().and_then(|slots| slots.state)
  }

  /// Generation name of the version currently in control.
  pub fn active_cache_name(&self) -> Option<String> {
    let slots = self.slots.read().ok()?;
    slots.active.as_ref().map(|a| a.cache_name().to_string())
  }

  fn set_state(&self, state: WorkerState) -> Result<()> {
    let mut slots = self
      .slots
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    slots.state = Some(state);
    Ok(())
  }

  /// Install a new version and, if it asks to skip waiting, activate it.
  ///
  /// When installation fails the new version becomes redundant and the
  /// previously active version keeps serving.
  pub async fn register(&self, agent: OfflineAgent<S, F>) -> Result<WorkerState> {
    let agent = Arc::new(agent);
    self.set_state(WorkerState::Installing)?;

    let report = match agent.on_install().await {
      Ok(report) => report,
      Err(e) => {
        self.set_state(WorkerState::Redundant)?;
        warn!(cache = %agent.cache_name(), "new version is redundant, previous version keeps serving");
        return Err(e);
      }
    };

    {
      let mut slots = self
        .slots
        .write()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;
      slots.waiting = Some(Arc::clone(&agent));
      slots.state = Some(WorkerState::Installed);
    }

    if report.skip_waiting {
      return self.activate_waiting().await;
    }

    Ok(WorkerState::Installed)
  }

  /// Promote the waiting version, run its activation, and let it take over.
  ///
  /// Activation failures are logged; the version still takes control.
  pub async fn activate_waiting(&self) -> Result<WorkerState> {
    let agent = {
      let mut slots = self
        .slots
        .write()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;
      let agent = slots
        .waiting
        .take()
        .ok_or_else(|| eyre!("No installed version is waiting"))?;
      slots.state = Some(WorkerState::Activating);
      agent
    };

    let claim = match agent.on_activate().await {
      Ok(report) => {
        if !report.orphaned.is_empty() {
          warn!(orphaned = ?report.orphaned, "some stale generations were left behind");
        }
        report.claim_clients
      }
      Err(e) => {
        warn!(cache = %agent.cache_name(), error = %e, "activation cleanup failed");
        true
      }
    };

    let previous = {
      let mut slots = self
        .slots
        .write()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;
      slots.state = Some(WorkerState::Activated);
      if claim || slots.active.is_none() {
        slots.active.replace(agent)
      } else {
        None
      }
    };

    // Let the outgoing version finish its background writes
    if let Some(previous) = previous {
      previous.settle().await;
    }

    info!(cache = ?self.active_cache_name(), "version activated");
    Ok(WorkerState::Activated)
  }

  /// Route a request through the version in control, or straight to the
  /// network when there is none.
  pub async fn handle_fetch(&self, request: Request) -> Intercepted {
    let active = self
      .slots
      .read()
      .ok()
      .and_then(|slots| slots.active.clone());

    match active {
      Some(agent) => agent.on_intercept(request).await,
      None => match self.fetcher.fetch(&request).await {
        Ok(response) => Intercepted::Network(response),
        Err(e) => Intercepted::Unavailable(e),
      },
    }
  }

  /// Wait for outstanding background work of the version in control.
  pub async fn settle(&self) {
    let active = self
      .slots
      .read()
      .ok()
      .and_then(|slots| slots.active.clone());

    if let Some(agent) = active {
      agent.settle().await;
    }
  }
}
