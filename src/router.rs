//! Request routing: classification and caching strategies.

use std::sync::Arc;

use color_eyre::Result;
use tracing::{debug, warn};

use crate::fetch::{FetchedResponse, Fetcher, Request};
use crate::store::{CacheBackend, CachedResponse};

/// Path prefixes routed network-first.
const DYNAMIC_PREFIXES: [&str; 2] = ["/api/", "/images/"];

/// The dashboard renders the stats payload unconditionally, so this endpoint
/// gets a synthesized response when both network and cache come up empty.
const STATS_PATH: &str = "/api/stats";

/// Request classification by path prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
  /// API calls and screenshot images; fresh data preferred.
  Dynamic,
  /// App shell and other static assets; cache preferred.
  Static,
}

/// Classify a request path. Stateless; recomputed per request.
pub fn classify(path: &str) -> RouteClass {
  if DYNAMIC_PREFIXES.iter().any(|prefix| path.starts_with(prefix)) {
    RouteClass::Dynamic
  } else {
    RouteClass::Static
  }
}

/// Applies a caching strategy per request class, against the shared cache
/// backend and the injected fetcher.
pub struct Router<B: CacheBackend, F: Fetcher> {
  backend: Arc<B>,
  fetcher: Arc<F>,
  /// Runtime store of the current generation; refilled on cache misses.
  runtime_store: String,
}

impl<B: CacheBackend, F: Fetcher> Router<B, F> {
  pub fn new(backend: Arc<B>, fetcher: Arc<F>, runtime_store: String) -> Self {
    Self {
      backend,
      fetcher,
      runtime_store,
    }
  }

  /// Route one request to a response. `Err` means this component produced no
  /// response; the failure propagates to the caller's own error handling.
  pub async fn route(&self, request: &Request) -> Result<FetchedResponse> {
    match classify(request.path()) {
      RouteClass::Dynamic => self.network_first(request).await,
      RouteClass::Static => self.cache_first(request).await,
    }
  }

  /// Network-first: a fresh copy is always preferred and persisted for
  /// future offline use; the cache only answers when the network cannot.
  async fn network_first(&self, request: &Request) -> Result<FetchedResponse> {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        self.refill(request, &response);
        Ok(response)
      }
      Err(err) => {
        debug!(url = request.target(), "network unavailable, trying cache");

        if let Some(cached) = self.lookup(request) {
          return Ok(cached.response);
        }
        if request.path() == STATS_PATH {
          return Ok(offline_stats());
        }

        Err(err)
      }
    }
  }

  /// Cache-first: shell assets rarely change within a generation; the
  /// network is only consulted to fill misses.
  async fn cache_first(&self, request: &Request) -> Result<FetchedResponse> {
    if let Some(cached) = self.lookup(request) {
      return Ok(cached.response);
    }

    let response = self.fetcher.fetch(request).await?;
    self.refill(request, &response);
    Ok(response)
  }

  /// Cache lookup; read failures degrade to misses.
  fn lookup(&self, request: &Request) -> Option<CachedResponse> {
    match self.backend.lookup(request.target()) {
      Ok(hit) => hit,
      Err(err) => {
        warn!(url = request.target(), error = %err, "cache lookup failed");
        None
      }
    }
  }

  /// Store a copy of a successful response in the runtime cache. Write
  /// failures never cost the caller the response it already has; error
  /// statuses pass through uncached.
  fn refill(&self, request: &Request, response: &FetchedResponse) {
    if !response.is_success() {
      return;
    }

    let entry = CachedResponse::new(response.clone());
    if let Err(err) = self.backend.put(&self.runtime_store, request.target(), &entry) {
      warn!(url = request.target(), error = %err, "failed to update runtime cache");
    }
  }
}

/// Placeholder stats served when the dashboard is offline with no cached
/// copy. The front-end renders this shape as-is.
fn offline_stats() -> FetchedResponse {
  let payload = serde_json::json!({
    "total_photos": "?",
    "storage_usage": "Offline",
    "categories": [],
    "insights": [],
  });

  FetchedResponse {
    status: 200,
    content_type: Some("application/json".to_string()),
    body: serde_json::to_vec(&payload).unwrap_or_default(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::testing::MockFetcher;
  use crate::store::MemoryBackend;
  use color_eyre::eyre::eyre;
  use serde_json::Value;

  fn request(target: &str) -> Request {
    Request::new(target).unwrap()
  }

  fn router(backend: Arc<MemoryBackend>, fetcher: Arc<MockFetcher>) -> Router<MemoryBackend, MockFetcher> {
    backend.open("v1-precache").unwrap();
    backend.open("v1-dynamic").unwrap();
    Router::new(backend, fetcher, "v1-dynamic".to_string())
  }

  #[test]
  fn test_classify() {
    assert_eq!(classify("/api/stats"), RouteClass::Dynamic);
    assert_eq!(classify("/api/category/Food"), RouteClass::Dynamic);
    assert_eq!(classify("/images/Food/pizza.jpg"), RouteClass::Dynamic);
    assert_eq!(classify("/"), RouteClass::Static);
    assert_eq!(classify("/index.html"), RouteClass::Static);
    assert_eq!(classify("/apixel.png"), RouteClass::Static);
    assert_eq!(classify("/css2"), RouteClass::Static);
  }

  #[tokio::test]
  async fn test_network_first_round_trip() {
    let backend = Arc::new(MemoryBackend::new());
    let fetcher = Arc::new(
      MockFetcher::new().with_body("/api/stats", "application/json", r#"{"total_photos":12}"#),
    );
    let router = router(Arc::clone(&backend), fetcher);

    let response = router.route(&request("/api/stats")).await.unwrap();
    assert_eq!(response.status, 200);

    // The stored copy is byte-identical to what the caller received.
    let hit = backend.lookup("/api/stats").unwrap().unwrap();
    assert_eq!(hit.response.body, response.body);
  }

  #[tokio::test]
  async fn test_network_first_serves_cache_when_offline() {
    let backend = Arc::new(MemoryBackend::new());
    let fetcher = Arc::new(
      MockFetcher::new().with_body("/api/category/Food", "application/json", r#"{"files":[]}"#),
    );
    let router = router(Arc::clone(&backend), Arc::clone(&fetcher));

    router.route(&request("/api/category/Food")).await.unwrap();

    fetcher.set_online(false);
    let response = router.route(&request("/api/category/Food")).await.unwrap();
    assert_eq!(response.body, br#"{"files":[]}"#);
    // Both routes attempted the network first.
    assert_eq!(fetcher.calls(), 2);
  }

  #[tokio::test]
  async fn test_offline_stats_fallback() {
    let backend = Arc::new(MemoryBackend::new());
    let router = router(backend, Arc::new(MockFetcher::offline()));

    let response = router.route(&request("/api/stats")).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type.as_deref(), Some("application/json"));

    let payload: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(payload["total_photos"], "?");
    assert_eq!(payload["storage_usage"], "Offline");
    assert_eq!(payload["categories"], Value::Array(vec![]));
    assert_eq!(payload["insights"], Value::Array(vec![]));
  }

  #[tokio::test]
  async fn test_offline_dynamic_miss_propagates_failure() {
    let backend = Arc::new(MemoryBackend::new());
    let fetcher = Arc::new(MockFetcher::offline());
    let router = router(backend, Arc::clone(&fetcher));

    assert!(router.route(&request("/api/search?q=x")).await.is_err());
    assert_eq!(fetcher.calls(), 1);
  }

  #[tokio::test]
  async fn test_cache_first_skips_network_on_hit() {
    let backend = Arc::new(MemoryBackend::new());
    let fetcher = Arc::new(MockFetcher::new());
    let router = router(Arc::clone(&backend), Arc::clone(&fetcher));

    backend
      .put(
        "v1-precache",
        "/index.html",
        &CachedResponse::new(FetchedResponse {
          status: 200,
          content_type: Some("text/html".to_string()),
          body: b"<html>shell</html>".to_vec(),
        }),
      )
      .unwrap();

    let response = router.route(&request("/index.html")).await.unwrap();
    assert_eq!(response.body, b"<html>shell</html>");
    assert_eq!(fetcher.calls(), 0);
  }

  #[tokio::test]
  async fn test_cache_first_fills_runtime_cache_on_miss() {
    let backend = Arc::new(MemoryBackend::new());
    let fetcher = Arc::new(MockFetcher::new().with_body("/styles.css", "text/css", "body{}"));
    let router = router(Arc::clone(&backend), Arc::clone(&fetcher));

    router.route(&request("/styles.css")).await.unwrap();
    assert_eq!(backend.entry_count("v1-dynamic").unwrap(), 1);

    // Second request is a cache hit; no further network traffic.
    router.route(&request("/styles.css")).await.unwrap();
    assert_eq!(fetcher.calls(), 1);
  }

  #[tokio::test]
  async fn test_cache_first_propagates_network_failure_on_miss() {
    let backend = Arc::new(MemoryBackend::new());
    let router = router(backend, Arc::new(MockFetcher::offline()));

    assert!(router.route(&request("/index.html")).await.is_err());
  }

  #[tokio::test]
  async fn test_error_status_returned_but_not_cached() {
    let backend = Arc::new(MemoryBackend::new());
    let fetcher = Arc::new(MockFetcher::new().with_response(
      "/api/category/Missing",
      FetchedResponse {
        status: 404,
        content_type: Some("text/plain".to_string()),
        body: b"Not found".to_vec(),
      },
    ));
    let router = router(Arc::clone(&backend), fetcher);

    let response = router.route(&request("/api/category/Missing")).await.unwrap();
    assert_eq!(response.status, 404);
    assert!(backend.lookup("/api/category/Missing").unwrap().is_none());
  }

  /// Backend whose reads and writes always fail.
  struct FailingBackend;

  impl CacheBackend for FailingBackend {
    fn open(&self, _name: &str) -> Result<()> {
      Err(eyre!("store unavailable"))
    }

    fn put(&self, _store: &str, _key: &str, _entry: &CachedResponse) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }

    fn lookup(&self, _key: &str) -> Result<Option<CachedResponse>> {
      Err(eyre!("store unavailable"))
    }

    fn store_names(&self) -> Result<Vec<String>> {
      Ok(Vec::new())
    }

    fn delete_store(&self, _name: &str) -> Result<()> {
      Err(eyre!("store unavailable"))
    }

    fn entry_count(&self, _store: &str) -> Result<usize> {
      Ok(0)
    }

    fn latest_stored_at(&self, _store: &str) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
      Ok(None)
    }
  }

  #[tokio::test]
  async fn test_store_failures_never_drop_the_response() {
    let fetcher = Arc::new(
      MockFetcher::new()
        .with_body("/api/stats", "application/json", "{}")
        .with_body("/index.html", "text/html", "<html></html>"),
    );
    let router = Router::new(Arc::new(FailingBackend), fetcher, "v1-dynamic".to_string());

    // Write failure is isolated from the network-first response path.
    let response = router.route(&request("/api/stats")).await.unwrap();
    assert_eq!(response.status, 200);

    // Read failure degrades to a miss; cache-first falls through to network.
    let response = router.route(&request("/index.html")).await.unwrap();
    assert_eq!(response.body, b"<html></html>");
  }
}
