//! Request-routing middleware applying the caching strategies.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use url::Url;

use repsync_common::{HttpRequest, HttpResponse, Method, Result};

use crate::config::CacheConfig;
use crate::fetch::Fetch;
use crate::router::{classify, Strategy};
use crate::substrate::CacheStorage;

/// Middleware sitting between the application and the network.
///
/// Implements [`Fetch`] itself, so anything that sends requests (including
/// the sync engine's submissions) can be routed through it.
#[derive(Clone)]
pub struct InterceptLayer {
    network: Arc<dyn Fetch>,
    cache: Arc<dyn CacheStorage>,
    config: Arc<CacheConfig>,
    revalidations: TaskTracker,
}

impl InterceptLayer {
    /// Create a layer over a network transport and a cache substrate.
    pub fn new(
        network: Arc<dyn Fetch>,
        cache: Arc<dyn CacheStorage>,
        config: CacheConfig,
    ) -> Self {
        Self {
            network,
            cache,
            config: Arc::new(config),
            revalidations: TaskTracker::new(),
        }
    }

    /// Get the layer configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Route a request through the strategy its shape selects.
    pub async fn handle(&self, request: HttpRequest) -> Result<HttpResponse> {
        let strategy = classify(&request, &self.config);
        debug!("{} {} -> {:?}", request.method, request.url, strategy);

        match strategy {
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
            Strategy::NetworkOnly => self.network.fetch(request).await,
            Strategy::CacheFirst => self.cache_first(request).await,
        }
    }

    /// Precache the root document and the configured asset list.
    ///
    /// Individual failures are logged and skipped. Returns how many entries
    /// were stored.
    pub async fn install(&self, origin: &Url) -> usize {
        let namespace = self.config.static_namespace();
        let paths =
            std::iter::once(&self.config.root_document).chain(self.config.precache.iter());

        let mut stored = 0;
        for path in paths {
            let url = match origin.join(path) {
                Ok(url) => url,
                Err(e) => {
                    warn!("Skipping invalid precache path {}: {}", path, e);
                    continue;
                }
            };

            let request = HttpRequest::get(url);
            match self.network.fetch(request.clone()).await {
                Ok(response) if response.is_success() => {
                    if self.store(&namespace, &request, &response).await {
                        stored += 1;
                    }
                }
                Ok(response) => {
                    warn!("Precache of {} returned {}", request.url, response.status);
                }
                Err(e) => warn!("Precache of {} failed: {}", request.url, e),
            }
        }

        info!("Installed {} assets into {}", stored, namespace);
        stored
    }

    /// Delete every namespace that does not belong to the current version.
    ///
    /// A namespace that cannot be deleted is logged and skipped. Returns the
    /// deleted namespace names.
    pub async fn activate(&self) -> Result<Vec<String>> {
        let keep = [self.config.static_namespace(), self.config.api_namespace()];
        let mut deleted = Vec::new();

        for namespace in self.cache.namespaces().await? {
            if keep.contains(&namespace) {
                continue;
            }
            match self.cache.delete_namespace(&namespace).await {
                Ok(true) => {
                    info!("Deleted stale cache namespace {}", namespace);
                    deleted.push(namespace);
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to delete cache namespace {}: {}", namespace, e),
            }
        }

        Ok(deleted)
    }

    /// Wait until every background revalidation started so far has finished.
    pub async fn settle(&self) {
        self.revalidations.close();
        self.revalidations.wait().await;
        self.revalidations.reopen();
    }

    async fn stale_while_revalidate(&self, request: HttpRequest) -> Result<HttpResponse> {
        let namespace = self.config.api_namespace();
        let key = request.cache_key();

        if let Some(cached) = self.lookup(&namespace, &key).await {
            debug!("Serving {} from cache, revalidating", key);
            self.spawn_revalidation(namespace, request);
            return Ok(cached);
        }

        let response = self.network.fetch(request.clone()).await?;
        if response.is_success() {
            self.store(&namespace, &request, &response).await;
        }
        Ok(response)
    }

    fn spawn_revalidation(&self, namespace: String, request: HttpRequest) {
        let network = self.network.clone();
        let cache = self.cache.clone();

        self.revalidations.spawn(async move {
            let key = request.cache_key();
            match network.fetch(request).await {
                Ok(response) if response.is_success() => {
                    if let Err(e) = cache.put(&namespace, &key, &response).await {
                        warn!("Failed to refresh cache entry {}: {}", key, e);
                    } else {
                        debug!("Revalidated {}", key);
                    }
                }
                Ok(response) => debug!("Revalidation of {} returned {}", key, response.status),
                Err(e) => debug!("Revalidation of {} failed: {}", key, e),
            }
        });
    }

    async fn cache_first(&self, request: HttpRequest) -> Result<HttpResponse> {
        let namespace = self.config.static_namespace();
        let key = request.cache_key();

        if let Some(cached) = self.lookup(&namespace, &key).await {
            return Ok(cached);
        }

        match self.network.fetch(request.clone()).await {
            Ok(response) => {
                if response.is_success() {
                    self.store(&namespace, &request, &response).await;
                }
                Ok(response)
            }
            Err(err) => {
                if request.is_navigation() {
                    if let Some(root) = self.root_document(&namespace, &request).await {
                        info!("Offline navigation to {}, serving root document", request.url);
                        return Ok(root);
                    }
                }
                Err(err)
            }
        }
    }

    async fn root_document(&self, namespace: &str, request: &HttpRequest) -> Option<HttpResponse> {
        let url = request.url.join(&self.config.root_document).ok()?;
        self.lookup(namespace, &HttpRequest::get(url).cache_key()).await
    }

    /// Cache read; substrate failures count as a miss.
    async fn lookup(&self, namespace: &str, key: &str) -> Option<HttpResponse> {
        match self.cache.get(namespace, key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Cache read {} in {} failed: {}", key, namespace, e);
                None
            }
        }
    }

    /// Cache write; only successful GET responses are ever stored.
    async fn store(&self, namespace: &str, request: &HttpRequest, response: &HttpResponse) -> bool {
        if request.method != Method::Get || !response.is_success() {
            return false;
        }
        match self.cache.put(namespace, &request.cache_key(), response).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Cache write {} in {} failed: {}", request.url, namespace, e);
                false
            }
        }
    }
}

#[async_trait]
impl Fetch for InterceptLayer {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.handle(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCacheStorage;
    use repsync_common::Error;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Network double serving canned responses by URL.
    #[derive(Default)]
    struct FakeNetwork {
        offline: AtomicBool,
        calls: AtomicUsize,
        routes: Mutex<HashMap<String, HttpResponse>>,
    }

    impl FakeNetwork {
        fn route(&self, url: &str, status: u16, body: &str) {
            self.routes
                .lock()
                .unwrap()
                .insert(url.to_string(), HttpResponse::new(status, body.to_string()));
        }

        fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetch for FakeNetwork {
        async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(Error::Network("offline".to_string()));
            }
            Ok(self
                .routes
                .lock()
                .unwrap()
                .get(request.url.as_str())
                .cloned()
                .unwrap_or_else(|| HttpResponse::new(404, "missing")))
        }
    }

    const ORIGIN: &str = "https://lift.example";

    fn url(path: &str) -> Url {
        Url::parse(ORIGIN).unwrap().join(path).unwrap()
    }

    fn setup(config: CacheConfig) -> (InterceptLayer, Arc<FakeNetwork>, MemoryCacheStorage) {
        let network = Arc::new(FakeNetwork::default());
        let cache = MemoryCacheStorage::new();
        let layer = InterceptLayer::new(network.clone(), Arc::new(cache.clone()), config);
        (layer, network, cache)
    }

    #[tokio::test]
    async fn test_api_read_cached_then_served_offline() {
        let (layer, network, cache) = setup(CacheConfig::default());
        network.route(&format!("{ORIGIN}/api/sessions"), 200, "[1]");

        let first = layer.handle(HttpRequest::get(url("/api/sessions"))).await.unwrap();
        assert_eq!(first.text(), "[1]");
        assert_eq!(cache.len("repsync-api-v1"), 1);

        network.set_offline(true);
        let second = layer.handle(HttpRequest::get(url("/api/sessions"))).await.unwrap();
        assert_eq!(second.text(), "[1]");

        // The failed background refresh leaves the entry intact.
        layer.settle().await;
        assert_eq!(cache.len("repsync-api-v1"), 1);
    }

    #[tokio::test]
    async fn test_stale_response_then_refreshed() {
        let (layer, network, _cache) = setup(CacheConfig::default());
        let endpoint = format!("{ORIGIN}/api/weight-logs");
        network.route(&endpoint, 200, "old");
        layer.handle(HttpRequest::get(url("/api/weight-logs"))).await.unwrap();

        network.route(&endpoint, 200, "new");
        let stale = layer.handle(HttpRequest::get(url("/api/weight-logs"))).await.unwrap();
        assert_eq!(stale.text(), "old");

        layer.settle().await;
        assert_eq!(network.calls(), 2);

        network.set_offline(true);
        let fresh = layer.handle(HttpRequest::get(url("/api/weight-logs"))).await.unwrap();
        assert_eq!(fresh.text(), "new");
    }

    #[tokio::test]
    async fn test_api_read_miss_offline_propagates() {
        let (layer, network, _cache) = setup(CacheConfig::default());
        network.set_offline(true);

        let err = layer
            .handle(HttpRequest::get(url("/api/sessions")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn test_non_success_reads_not_cached() {
        let (layer, network, cache) = setup(CacheConfig::default());
        network.route(&format!("{ORIGIN}/api/sessions"), 500, "oops");

        let response = layer.handle(HttpRequest::get(url("/api/sessions"))).await.unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(cache.len("repsync-api-v1"), 0);
    }

    #[tokio::test]
    async fn test_api_write_offline_fails_without_cache() {
        let (layer, network, cache) = setup(CacheConfig::default());
        network.route(&format!("{ORIGIN}/api/sets"), 200, "ok");

        // Prime a GET on the same URL; the POST must not see it.
        layer.handle(HttpRequest::get(url("/api/sets"))).await.unwrap();
        network.set_offline(true);

        let post = HttpRequest::json(Method::Post, url("/api/sets"), &serde_json::json!({})).unwrap();
        let err = layer.handle(post).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        assert_eq!(cache.len("repsync-api-v1"), 1);
    }

    #[tokio::test]
    async fn test_api_write_online_is_not_cached() {
        let (layer, network, cache) = setup(CacheConfig::default());
        network.route(&format!("{ORIGIN}/api/sets"), 201, "created");

        let post = HttpRequest::json(Method::Post, url("/api/sets"), &serde_json::json!({})).unwrap();
        let response = layer.handle(post).await.unwrap();
        assert_eq!(response.status, 201);
        assert!(cache.namespaces().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_static_asset_cache_first() {
        let (layer, network, cache) = setup(CacheConfig::default());
        network.route(&format!("{ORIGIN}/assets/app.js"), 200, "js");

        layer.handle(HttpRequest::get(url("/assets/app.js"))).await.unwrap();
        layer.handle(HttpRequest::get(url("/assets/app.js"))).await.unwrap();

        assert_eq!(network.calls(), 1);
        assert_eq!(cache.len("repsync-static-v1"), 1);
    }

    #[tokio::test]
    async fn test_offline_navigation_falls_back_to_root() {
        let (layer, network, _cache) = setup(CacheConfig::default());
        network.route(&format!("{ORIGIN}/"), 200, "<html>shell</html>");
        assert_eq!(layer.install(&url("/")).await, 1);

        network.set_offline(true);
        let page = layer.handle(HttpRequest::navigate(url("/history"))).await.unwrap();
        assert_eq!(page.text(), "<html>shell</html>");

        // Non-navigational asset misses still fail.
        let err = layer
            .handle(HttpRequest::get(url("/assets/chart.js")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn test_install_skips_failures() {
        let config = CacheConfig {
            precache: vec!["/assets/app.js".to_string(), "/assets/missing.css".to_string()],
            ..CacheConfig::default()
        };
        let (layer, network, cache) = setup(config);
        network.route(&format!("{ORIGIN}/"), 200, "shell");
        network.route(&format!("{ORIGIN}/assets/app.js"), 200, "js");

        assert_eq!(layer.install(&url("/")).await, 2);
        assert_eq!(cache.len("repsync-static-v1"), 2);
    }

    #[tokio::test]
    async fn test_activate_removes_other_versions() {
        let cache = MemoryCacheStorage::new();
        let entry = HttpResponse::new(200, "x");
        for ns in ["repsync-static-v1", "repsync-api-v1", "repsync-api-v2", "legacy"] {
            cache.put(ns, "k", &entry).await.unwrap();
        }

        let config = CacheConfig {
            version: "v2".to_string(),
            ..CacheConfig::default()
        };
        let layer = InterceptLayer::new(
            Arc::new(FakeNetwork::default()),
            Arc::new(cache.clone()),
            config,
        );

        let mut deleted = layer.activate().await.unwrap();
        deleted.sort();
        assert_eq!(deleted, vec!["legacy", "repsync-api-v1", "repsync-static-v1"]);
        assert_eq!(cache.namespaces().await.unwrap(), vec!["repsync-api-v2"]);
    }

    /// Substrate whose deletions fail for one namespace.
    struct StuckNamespace {
        inner: MemoryCacheStorage,
        stuck: &'static str,
    }

    #[async_trait]
    impl CacheStorage for StuckNamespace {
        async fn get(&self, namespace: &str, key: &str) -> Result<Option<HttpResponse>> {
            self.inner.get(namespace, key).await
        }

        async fn put(&self, namespace: &str, key: &str, response: &HttpResponse) -> Result<()> {
            self.inner.put(namespace, key, response).await
        }

        async fn namespaces(&self) -> Result<Vec<String>> {
            self.inner.namespaces().await
        }

        async fn delete_namespace(&self, namespace: &str) -> Result<bool> {
            if namespace == self.stuck {
                return Err(Error::Cache(format!("{} is locked", namespace)));
            }
            self.inner.delete_namespace(namespace).await
        }
    }

    fn v2_config() -> CacheConfig {
        CacheConfig {
            version: "v2".to_string(),
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn test_activate_continues_past_failed_delete() {
        let inner = MemoryCacheStorage::new();
        let entry = HttpResponse::new(200, "x");
        for ns in ["aaa-locked", "repsync-api-v1", "repsync-static-v1"] {
            inner.put(ns, "k", &entry).await.unwrap();
        }
        let cache = StuckNamespace {
            inner: inner.clone(),
            stuck: "aaa-locked",
        };
        let layer = InterceptLayer::new(Arc::new(FakeNetwork::default()), Arc::new(cache), v2_config());

        let mut deleted = layer.activate().await.unwrap();
        deleted.sort();

        assert_eq!(deleted, vec!["repsync-api-v1", "repsync-static-v1"]);
        assert_eq!(inner.namespaces().await.unwrap(), vec!["aaa-locked"]);
    }

    #[tokio::test]
    async fn test_activate_on_disk_ignores_foreign_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = crate::local::LocalCacheStorage::new(dir.path()).unwrap();
        cache
            .put("repsync-api-v1", "GET https://lift.example/api/sets", &HttpResponse::new(200, "[]"))
            .await
            .unwrap();
        std::fs::create_dir(dir.path().join("old cache")).unwrap();

        let layer = InterceptLayer::new(Arc::new(FakeNetwork::default()), Arc::new(cache), v2_config());
        let deleted = layer.activate().await.unwrap();

        assert_eq!(deleted, vec!["repsync-api-v1"]);
        assert!(!dir.path().join("repsync-api-v1").exists());
        assert!(dir.path().join("old cache").exists());
    }
}
