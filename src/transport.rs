//! Network transport seam.
//!
//! The router and sync coordinator talk to the network only through the
//! [`Transport`] trait so tests can substitute deterministic fakes.

use color_eyre::{eyre::eyre, Result};
use url::Url;

use crate::http::{Request, Response};

/// Network operations needed by the router and the sync coordinator.
pub trait Transport: Send + Sync {
  /// Fetch a request, returning whatever the network produced. A non-200
  /// response is a successful fetch; only transport-level failures are `Err`.
  fn fetch(&self, request: &Request) -> impl std::future::Future<Output = Result<Response>> + Send;

  /// Fetch with cache-bypass semantics, used when refreshing critical assets.
  fn fetch_bypass(
    &self,
    request: &Request,
  ) -> impl std::future::Future<Output = Result<Response>> + Send;

  /// POST a JSON payload to a sync endpoint. `Err` on transport failure or
  /// a non-success status.
  fn post_json(
    &self,
    url: &Url,
    payload: &serde_json::Value,
  ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }

  async fn do_fetch(&self, request: &Request, bypass: bool) -> Result<Response> {
    let mut builder = self.client.get(request.url().clone());
    if bypass {
      builder = builder.header(reqwest::header::CACHE_CONTROL, "no-cache");
    }

    let resp = builder
      .send()
      .await
      .map_err(|e| eyre!("Fetch failed for {}: {}", request.url(), e))?;

    let status = resp.status().as_u16();
    let content_type = resp
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);

    let body = resp
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body for {}: {}", request.url(), e))?
      .to_vec();

    Ok(Response::network(status, content_type, body))
  }
}

impl Transport for HttpTransport {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.do_fetch(request, false).await
  }

  async fn fetch_bypass(&self, request: &Request) -> Result<Response> {
    self.do_fetch(request, true).await
  }

  async fn post_json(&self, url: &Url, payload: &serde_json::Value) -> Result<()> {
    let resp = self
      .client
      .post(url.clone())
      .json(payload)
      .send()
      .await
      .map_err(|e| eyre!("Sync POST failed for {}: {}", url, e))?;

    if !resp.status().is_success() {
      return Err(eyre!("Sync endpoint {} returned {}", url, resp.status()));
    }

    Ok(())
  }
}
