//! Offline asset cache: keeps the app shell loadable with no network.
//!
//! A state machine over a versioned persistent cache. *Install* pre-populates
//! the current cache from the app-shell manifest, tolerating individual fetch
//! failures. *Activate* evicts every cache from previous versions. *Serve*
//! answers requests by class, and no branch ever fails outward — every policy
//! ends in a cached copy, a synthesized placeholder, or the offline page.

mod fetch;
mod store;

pub use fetch::{FetchedResponse, Fetcher, HttpFetcher, NetworkError};
pub use store::{AssetStore, CachedAsset, ASSETS_DB_FILE};

use tracing::{debug, warn};
use url::Url;

/// Versioned cache name. Bumping the version counter is the only way to
/// force stale-asset eviction on the next activation.
pub const CACHE_NAME: &str = "healthlog-shell-v2";

/// Reverse-geocoding API host. Network-only: its responses are
/// rate-limited, personalized lookups that must never be replayed from
/// cache.
const GEOCODING_HOST: &str = "nominatim.openstreetmap.org";

const OFFLINE_HTML: &str = "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width,initial-scale=1\"><title>Offline</title>\
</head><body><p>No connection. Open the app again once you are back online.</p></body></html>";

const OFFLINE_JSON: &[u8] = br#"{"error":"offline"}"#;

/// What kind of request is being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// A navigation / document request.
  Navigate,
  /// A subresource request (script, stylesheet, image, data).
  Resource,
}

#[derive(Debug, Clone)]
pub struct AssetRequest {
  pub url: Url,
  pub mode: RequestMode,
}

/// Where a served response came from. Useful for logging and assertions;
/// callers render the body either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeSource {
  Network,
  Cache,
  Placeholder,
}

/// The terminal response of a serve: always renderable, never an error.
#[derive(Debug, Clone)]
pub struct ServedResponse {
  pub status: u16,
  pub content_type: String,
  pub body: Vec<u8>,
  pub source: ServeSource,
}

impl ServedResponse {
  fn from_network(res: FetchedResponse) -> Self {
    Self {
      status: res.status,
      content_type: res
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string()),
      body: res.body,
      source: ServeSource::Network,
    }
  }

  fn from_cache(asset: CachedAsset) -> Self {
    Self {
      status: asset.status,
      content_type: asset
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string()),
      body: asset.body,
      source: ServeSource::Cache,
    }
  }

  fn placeholder(status: u16, content_type: &str, body: &[u8]) -> Self {
    Self {
      status,
      content_type: content_type.to_string(),
      body: body.to_vec(),
      source: ServeSource::Placeholder,
    }
  }
}

/// Outcome of pre-populating the shell cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallReport {
  pub requested: usize,
  pub cached: usize,
  pub failed: usize,
}

pub struct ShellCache<F: Fetcher> {
  store: AssetStore,
  fetcher: F,
  /// App origin root; manifest paths resolve against it.
  base: Url,
  manifest: Vec<String>,
}

impl<F: Fetcher> ShellCache<F> {
  pub fn new(store: AssetStore, fetcher: F, base: Url, manifest: Vec<String>) -> Self {
    Self {
      store,
      fetcher,
      base,
      manifest,
    }
  }

  /// Pre-populate the current cache with the app-shell manifest.
  ///
  /// Failures are tolerated per asset so one missing icon does not abort the
  /// whole install; the report says how much of the shell made it.
  pub async fn install(&self) -> InstallReport {
    let jobs = self.manifest.iter().map(|path| async move {
      let url = match self.base.join(path) {
        Ok(url) => url,
        Err(e) => {
          warn!(path = %path, error = %e, "manifest path does not resolve, skipping");
          return false;
        }
      };
      match self.fetcher.fetch(&url).await {
        Ok(res) if res.ok() => {
          self.put(&url, &res);
          true
        }
        Ok(res) => {
          warn!(url = %url, status = res.status, "shell asset fetch not ok, skipping");
          false
        }
        Err(e) => {
          warn!(url = %url, error = %e, "shell asset fetch failed, skipping");
          false
        }
      }
    });

    let results = futures::future::join_all(jobs).await;
    let cached = results.iter().filter(|ok| **ok).count();
    InstallReport {
      requested: results.len(),
      cached,
      failed: results.len() - cached,
    }
  }

  /// Become the exclusive cache: drop every cache from previous versions.
  pub fn activate(&self) -> color_eyre::Result<usize> {
    let dropped = self.store.drop_other_caches(CACHE_NAME)?;
    debug!(dropped, cache = CACHE_NAME, "old shell caches evicted");
    Ok(dropped)
  }

  /// Answer a request. Infallible: every branch has a terminal fallback.
  pub async fn serve(&self, req: &AssetRequest) -> ServedResponse {
    if req.url.origin() != self.base.origin() {
      if req.url.host_str() == Some(GEOCODING_HOST) {
        return self.serve_geocoding(req).await;
      }
      return self.serve_cross_origin(req).await;
    }
    match req.mode {
      RequestMode::Navigate => self.serve_navigation(req).await,
      RequestMode::Resource => self.serve_resource(req).await,
    }
  }

  /// (a) Geocoding: network-only, never cached, synthesized offline error.
  async fn serve_geocoding(&self, req: &AssetRequest) -> ServedResponse {
    match self.fetcher.fetch(&req.url).await {
      Ok(res) => ServedResponse::from_network(res),
      Err(e) => {
        debug!(url = %req.url, error = %e, "geocoding offline");
        ServedResponse::placeholder(503, "application/json", OFFLINE_JSON)
      }
    }
  }

  /// (b) Other cross-origin: network-first, cache as a side effect of
  /// success, cache fallback on failure.
  async fn serve_cross_origin(&self, req: &AssetRequest) -> ServedResponse {
    match self.fetcher.fetch(&req.url).await {
      Ok(res) => {
        if res.ok() {
          self.put(&req.url, &res);
        }
        ServedResponse::from_network(res)
      }
      Err(_) => match self.cached(&req.url, false) {
        Some(hit) => ServedResponse::from_cache(hit),
        None => ServedResponse::placeholder(504, "text/plain", b"offline"),
      },
    }
  }

  /// (c) Navigation: network-first; offline falls back through exact match
  /// (ignoring the query string), the cached app root, the cached index
  /// document, and finally a minimal hardcoded offline page.
  async fn serve_navigation(&self, req: &AssetRequest) -> ServedResponse {
    match self.fetcher.fetch(&req.url).await {
      Ok(res) => {
        if res.ok() {
          self.put(&req.url, &res);
        }
        ServedResponse::from_network(res)
      }
      Err(_) => {
        if let Some(hit) = self.cached(&req.url, true) {
          return ServedResponse::from_cache(hit);
        }
        if let Some(hit) = self.cached(&self.base, false) {
          return ServedResponse::from_cache(hit);
        }
        if let Some(hit) = self
          .base
          .join("index.html")
          .ok()
          .and_then(|index| self.cached(&index, false))
        {
          return ServedResponse::from_cache(hit);
        }
        ServedResponse::placeholder(200, "text/html; charset=utf-8", OFFLINE_HTML.as_bytes())
      }
    }
  }

  /// (d) Same-origin resources: cache-first, network fallback that also
  /// populates the cache, typed placeholder on total failure.
  async fn serve_resource(&self, req: &AssetRequest) -> ServedResponse {
    if let Some(hit) = self.cached(&req.url, false) {
      return ServedResponse::from_cache(hit);
    }
    match self.fetcher.fetch(&req.url).await {
      Ok(res) => {
        if res.ok() {
          self.put(&req.url, &res);
        }
        ServedResponse::from_network(res)
      }
      Err(_) => placeholder_for(req.url.path()),
    }
  }

  fn put(&self, url: &Url, res: &FetchedResponse) {
    let asset = CachedAsset {
      status: res.status,
      content_type: res.content_type.clone(),
      body: res.body.clone(),
    };
    if let Err(e) = self.store.put(CACHE_NAME, url.as_str(), &asset) {
      warn!(url = %url, error = %e, "failed to cache asset");
    }
  }

  /// Cache lookup with the host-alias retry: the cache may have been
  /// populated while the app was served under the other of
  /// `localhost`/`127.0.0.1`.
  fn cached(&self, url: &Url, ignore_query: bool) -> Option<CachedAsset> {
    if let Some(hit) = self.lookup(url, ignore_query) {
      return Some(hit);
    }
    alternate_host(url).and_then(|alt| self.lookup(&alt, ignore_query))
  }

  fn lookup(&self, url: &Url, ignore_query: bool) -> Option<CachedAsset> {
    let result = if ignore_query {
      let mut bare = url.clone();
      bare.set_query(None);
      bare.set_fragment(None);
      self.store.get_ignoring_query(CACHE_NAME, bare.as_str())
    } else {
      self.store.get(CACHE_NAME, url.as_str())
    };
    match result {
      Ok(hit) => hit,
      Err(e) => {
        warn!(url = %url, error = %e, "asset lookup failed");
        None
      }
    }
  }
}

/// URL with `localhost` and `127.0.0.1` swapped; `None` for any other host.
fn alternate_host(url: &Url) -> Option<Url> {
  let alt_host = match url.host_str() {
    Some("localhost") => "127.0.0.1",
    Some("127.0.0.1") => "localhost",
    _ => return None,
  };
  let mut alt = url.clone();
  alt.set_host(Some(alt_host)).ok()?;
  Some(alt)
}

/// Typed placeholder so a page missing one subresource still renders.
fn placeholder_for(path: &str) -> ServedResponse {
  if path.ends_with(".js") {
    ServedResponse::placeholder(504, "application/javascript", b"// offline")
  } else if path.ends_with(".css") {
    ServedResponse::placeholder(504, "text/css", b"/* offline */")
  } else {
    ServedResponse::placeholder(504, "text/plain", b"offline")
  }
}
