//! Controller lifecycle: install, activate, and request handling.
//!
//! A generation of the controller moves through three states, driven by the
//! host rather than by an ambient event source:
//!
//! ```text
//! Installing --install()--> Waiting --activate()--> Active
//! ```
//!
//! Only an active controller serves requests. A failed install leaves the
//! previously active generation untouched; its stores are purged only by a
//! successful activation of the replacement.

use std::collections::BTreeSet;
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use futures::future;
use tracing::{debug, info, warn};

use crate::fetch::{FetchedResponse, Fetcher, Request};
use crate::router::Router;
use crate::store::{CacheBackend, CachedResponse};

/// One deployed version of the controller: a version tag and the pair of
/// store names bound to it. The version must change on every deployment
/// that changes the static-asset manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
  version: String,
}

impl Generation {
  pub fn new(version: impl Into<String>) -> Self {
    Self {
      version: version.into(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  /// Store populated once at install time from the asset manifest.
  pub fn precache_store(&self) -> String {
    format!("{}-precache", self.version)
  }

  /// Store populated lazily as resources are fetched.
  pub fn runtime_store(&self) -> String {
    format!("{}-dynamic", self.version)
  }
}

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
  Installing,
  Waiting,
  Active,
}

pub struct OfflineController<B: CacheBackend, F: Fetcher> {
  backend: Arc<B>,
  fetcher: Arc<F>,
  generation: Generation,
  manifest: Vec<String>,
  router: Router<B, F>,
  state: ControllerState,
}

impl<B: CacheBackend, F: Fetcher> OfflineController<B, F> {
  /// New controller for a generation that has not been installed yet.
  pub fn new(
    backend: Arc<B>,
    fetcher: Arc<F>,
    generation: Generation,
    manifest: Vec<String>,
  ) -> Self {
    let router = Router::new(
      Arc::clone(&backend),
      Arc::clone(&fetcher),
      generation.runtime_store(),
    );

    Self {
      backend,
      fetcher,
      generation,
      manifest,
      router,
      state: ControllerState::Installing,
    }
  }

  /// Attach to a generation installed by a previous run, skipping straight
  /// to `Active`. Fails if the generation's precache store is absent.
  pub fn attach(
    backend: Arc<B>,
    fetcher: Arc<F>,
    generation: Generation,
    manifest: Vec<String>,
  ) -> Result<Self> {
    let precache = generation.precache_store();
    if !backend.store_names()?.contains(&precache) {
      return Err(eyre!(
        "generation {} is not installed; run install first",
        generation.version()
      ));
    }

    let mut controller = Self::new(backend, fetcher, generation, manifest);
    controller.state = ControllerState::Active;
    Ok(controller)
  }

  pub fn state(&self) -> ControllerState {
    self.state
  }

  pub fn generation(&self) -> &Generation {
    &self.generation
  }

  /// Populate the precache from the asset manifest.
  ///
  /// All-or-nothing: every manifest fetch must succeed with a success
  /// status, or the install fails and the previously active generation
  /// keeps serving. On success the controller moves to `Waiting` and is
  /// immediately eligible for activation; there is no waiting on old pages.
  pub async fn install(&mut self) -> Result<()> {
    if self.state != ControllerState::Installing {
      return Err(eyre!("install is only valid in the installing state"));
    }

    let requests = self
      .manifest
      .iter()
      .map(|target| Request::new(target))
      .collect::<Result<Vec<_>>>()?;

    let fetcher = Arc::clone(&self.fetcher);
    let fetches: Vec<_> = requests
      .iter()
      .map(|request| fetcher.fetch(request))
      .collect();
    let responses = future::try_join_all(fetches).await?;

    for (request, response) in requests.iter().zip(&responses) {
      if !response.is_success() {
        return Err(eyre!(
          "precache fetch for {} returned status {}",
          request.target(),
          response.status
        ));
      }
    }

    let precache = self.generation.precache_store();
    self.backend.open(&precache)?;
    self.backend.open(&self.generation.runtime_store())?;

    for (request, response) in requests.iter().zip(responses) {
      if let Err(err) = self
        .backend
        .put(&precache, request.target(), &CachedResponse::new(response))
      {
        // Do not leave a half-populated precache behind.
        if let Err(cleanup) = self.backend.delete_store(&precache) {
          warn!(store = %precache, error = %cleanup, "failed to remove partial precache store");
        }
        return Err(err);
      }
    }

    debug!(
      generation = self.generation.version(),
      assets = self.manifest.len(),
      "precache populated"
    );
    self.state = ControllerState::Waiting;
    Ok(())
  }

  /// Purge stores from superseded generations and start serving requests.
  pub fn activate(&mut self) -> Result<()> {
    if self.state != ControllerState::Waiting {
      return Err(eyre!("activate is only valid in the waiting state"));
    }

    let keep: BTreeSet<String> = [
      self.generation.precache_store(),
      self.generation.runtime_store(),
    ]
    .into_iter()
    .collect();

    // Cleanup is best-effort; failing to purge never blocks activation.
    match self.backend.delete_stores_except(&keep) {
      Ok(removed) => {
        for name in removed {
          debug!(store = %name, "removed stale cache store");
        }
      }
      Err(err) => warn!(error = %err, "stale cache cleanup failed"),
    }

    self.state = ControllerState::Active;
    info!(generation = self.generation.version(), "generation active");
    Ok(())
  }

  /// Route one request. Only an active controller serves requests; hosts
  /// pass traffic straight to the network otherwise.
  pub async fn handle(&self, request: &Request) -> Result<FetchedResponse> {
    if self.state != ControllerState::Active {
      return Err(eyre!("controller is not active"));
    }

    self.router.route(request).await
  }
}
