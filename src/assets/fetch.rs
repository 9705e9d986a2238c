//! Network access for the asset cache.
//!
//! The serving policies only care about "a response arrived" versus "the
//! network failed", so the fetcher surfaces HTTP error statuses as responses
//! and reserves [`NetworkError`] for transport failures.

use thiserror::Error;
use url::Url;

/// External fetch failure. Always recovered locally by falling back to the
/// cache or a synthesized placeholder; never surfaced as a hard failure for
/// navigation or static-asset requests.
#[derive(Debug, Clone, Error)]
#[error("fetch failed for {url}: {reason}")]
pub struct NetworkError {
  pub url: String,
  pub reason: String,
}

/// A complete fetched response. Bodies are buffered whole; everything that
/// passes through here is a small app-shell asset or API reply.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl FetchedResponse {
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// The asset cache's view of the network. Implemented over reqwest for the
/// real application and stubbed in tests.
pub trait Fetcher {
  fn fetch(
    &self,
    url: &Url,
  ) -> impl std::future::Future<Output = Result<FetchedResponse, NetworkError>>;
}

/// reqwest-backed fetcher.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Self {
    Self {
      client: reqwest::Client::new(),
    }
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, url: &Url) -> Result<FetchedResponse, NetworkError> {
    let err = |e: reqwest::Error| NetworkError {
      url: url.to_string(),
      reason: e.to_string(),
    };

    let response = self.client.get(url.clone()).send().await.map_err(err)?;
    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(str::to_string);
    let body = response.bytes().await.map_err(err)?.to_vec();

    Ok(FetchedResponse {
      status,
      content_type,
      body,
    })
  }
}
