//! Network seam: requests, response snapshots, and the fetcher abstraction.
//!
//! The router and controller depend on the [`Fetcher`] trait rather than a
//! concrete HTTP stack, so hosts and tests substitute their own network.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::CONTENT_TYPE;
use url::Url;

/// A request on its way to the origin server.
///
/// Targets are either root-relative paths (`/api/stats`) or absolute URLs
/// (cross-origin font stylesheets). The target string as issued is the
/// cache key; the parsed path drives route classification.
#[derive(Debug, Clone)]
pub struct Request {
  target: String,
  path: String,
}

impl Request {
  pub fn new(target: &str) -> Result<Self> {
    let path = if target.starts_with('/') {
      let end = target.find(['?', '#']).unwrap_or(target.len());
      target[..end].to_string()
    } else {
      let url =
        Url::parse(target).map_err(|e| eyre!("Invalid request target {}: {}", target, e))?;
      url.path().to_string()
    };

    Ok(Self {
      target: target.to_string(),
      path,
    })
  }

  /// The target as issued; used as the cache key.
  pub fn target(&self) -> &str {
    &self.target
  }

  /// Path component with query and fragment stripped.
  pub fn path(&self) -> &str {
    &self.path
  }
}

/// Response snapshot: what a fetch produced, or what a cache store holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResponse {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl FetchedResponse {
  /// Whether the status allows this response to be cached.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Where responses come from.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<FetchedResponse>;
}

/// Fetcher backed by the origin server over HTTP.
pub struct HttpFetcher {
  client: reqwest::Client,
  origin: Url,
}

impl HttpFetcher {
  pub fn new(origin: &str) -> Result<Self> {
    let origin = Url::parse(origin).map_err(|e| eyre!("Invalid origin {}: {}", origin, e))?;
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }

  /// Root-relative targets resolve against the origin; absolute URLs pass
  /// through untouched.
  fn resolve(&self, request: &Request) -> Result<Url> {
    if request.target().starts_with('/') {
      self.origin.join(request.target()).map_err(|e| {
        eyre!(
          "Failed to resolve {} against {}: {}",
          request.target(),
          self.origin,
          e
        )
      })
    } else {
      Url::parse(request.target())
        .map_err(|e| eyre!("Invalid request target {}: {}", request.target(), e))
    }
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<FetchedResponse> {
    let url = self.resolve(request)?;

    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Fetch failed for {}: {}", url, e))?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|value| value.to_str().ok())
      .map(String::from);

    // Buffer the whole body up front: the cached copy and the response
    // handed back to the caller must be the same bytes.
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body from {}: {}", url, e))?
      .to_vec();

    Ok(FetchedResponse {
      status,
      content_type,
      body,
    })
  }
}

/// Fetcher that never reaches the network. Used by `get --offline` and by
/// tests that assert cache behavior.
pub struct OfflineFetcher;

#[async_trait]
impl Fetcher for OfflineFetcher {
  async fn fetch(&self, request: &Request) -> Result<FetchedResponse> {
    Err(eyre!("network disabled: {}", request.target()))
  }
}

#[cfg(test)]
pub(crate) mod testing {
  //! Canned-response fetcher with a network-call counter.

  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

  use super::*;

  pub struct MockFetcher {
    responses: HashMap<String, FetchedResponse>,
    calls: AtomicUsize,
    online: AtomicBool,
  }

  impl MockFetcher {
    pub fn new() -> Self {
      Self {
        responses: HashMap::new(),
        calls: AtomicUsize::new(0),
        online: AtomicBool::new(true),
      }
    }

    pub fn with_body(self, target: &str, content_type: &str, body: &str) -> Self {
      self.with_response(
        target,
        FetchedResponse {
          status: 200,
          content_type: Some(content_type.to_string()),
          body: body.as_bytes().to_vec(),
        },
      )
    }

    pub fn with_response(mut self, target: &str, response: FetchedResponse) -> Self {
      self.responses.insert(target.to_string(), response);
      self
    }

    pub fn offline() -> Self {
      let fetcher = Self::new();
      fetcher.online.store(false, Ordering::SeqCst);
      fetcher
    }

    pub fn set_online(&self, online: bool) {
      self.online.store(online, Ordering::SeqCst);
    }

    /// Number of fetch attempts, successful or not.
    pub fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<FetchedResponse> {
      self.calls.fetch_add(1, Ordering::SeqCst);

      if !self.online.load(Ordering::SeqCst) {
        return Err(eyre!("network disabled: {}", request.target()));
      }

      self
        .responses
        .get(request.target())
        .cloned()
        .ok_or_else(|| eyre!("connection refused: {}", request.target()))
    }
  }
}
