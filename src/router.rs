//! Fetch router: classifies inbound requests and dispatches them to the
//! matching caching strategy.
//!
//! `handle` is infallible by contract: every path terminates in a cached,
//! network or synthesized fallback response, never an error. Within one flow
//! the cache lookup and the network fetch run strictly sequentially, never
//! raced, so a network response can't be shadowed by a concurrent cache
//! write.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::evict;
use crate::http::{AssetKind, Request, Response, ResponseSource};
use crate::store::{CacheEntry, CacheStore, Tiers};
use crate::transport::Transport;

/// Request classification; first match wins, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// API endpoint: network-first with cached fallback
  Api,
  /// Known app-shell asset: cache-first with typed offline fallbacks
  StaticAsset,
  /// Top-level document load: network, then cached shell
  Navigation,
  /// Everything else: cache-first with size-bounded write-through
  Dynamic,
}

pub struct FetchRouter<S: CacheStore, T: Transport> {
  store: Arc<S>,
  transport: Arc<T>,
  config: Arc<Config>,
  tiers: Tiers,
}

impl<S: CacheStore, T: Transport> FetchRouter<S, T> {
  pub fn new(store: Arc<S>, transport: Arc<T>, config: Arc<Config>) -> Self {
    let tiers = Tiers::new(&config.cache_version);
    Self {
      store,
      transport,
      config,
      tiers,
    }
  }

  pub fn classify(&self, request: &Request) -> RequestClass {
    if request.path().starts_with(&self.config.api_prefix) {
      RequestClass::Api
    } else if self.in_manifest(request.path()) {
      RequestClass::StaticAsset
    } else if request.is_navigation() {
      RequestClass::Navigation
    } else {
      RequestClass::Dynamic
    }
  }

  fn in_manifest(&self, path: &str) -> bool {
    self.config.asset_manifest.iter().any(|m| m == path)
  }

  /// Route a request to a response. Never fails: network errors degrade to
  /// cache, cache misses degrade to synthesized fallbacks.
  pub async fn handle(&self, request: &Request) -> Response {
    match self.classify(request) {
      RequestClass::Api => self.network_first(request).await,
      RequestClass::StaticAsset => self.cache_first_static(request).await,
      RequestClass::Navigation => self.navigation(request).await,
      RequestClass::Dynamic => self.cache_first_dynamic(request).await,
    }
  }

  /// Network-first for API requests: fresh data when reachable, cached data
  /// when not, synthesized JSON error as the last resort.
  async fn network_first(&self, request: &Request) -> Response {
    let key = request.cache_key();
    match self.transport.fetch(request).await {
      Ok(resp) if resp.is_success() => {
        self.write_dynamic(&key, &resp);
        resp
      }
      Ok(resp) => resp,
      Err(e) => {
        debug!(url = %request.url(), error = %e, "API fetch failed, trying cache");
        match self.lookup(&self.tiers.dynamic_tier, &key) {
          Some(cached) => cached,
          None => Response::offline_error("This data is unavailable while offline"),
        }
      }
    }
  }

  /// Cache-first for manifest assets, with asset-type-specific fallbacks so
  /// playback and rendering call sites never see a hard error.
  async fn cache_first_static(&self, request: &Request) -> Response {
    let key = request.cache_key();
    if let Some(cached) = self.lookup(&self.tiers.static_tier, &key) {
      return cached;
    }

    match self.transport.fetch(request).await {
      Ok(resp) => {
        if resp.is_success() {
          self.write_through(&self.tiers.static_tier, &key, &resp);
        }
        resp
      }
      Err(e) => {
        debug!(url = %request.url(), error = %e, "static asset unreachable, using fallback");
        self.static_fallback(request)
      }
    }
  }

  fn static_fallback(&self, request: &Request) -> Response {
    match request.asset_kind() {
      // Silent placeholder keeps the sound player from erroring out
      AssetKind::Audio => Response::audio_placeholder(request.path()),
      AssetKind::Image => self
        .config
        .resolve(&self.config.default_icon)
        .ok()
        .and_then(|icon_url| self.lookup(&self.tiers.static_tier, icon_url.as_str()))
        .unwrap_or_else(|| Response::unavailable(request.path())),
      AssetKind::Other => Response::unavailable(request.path()),
    }
  }

  /// Navigation: network, then the cached app-shell root document.
  async fn navigation(&self, request: &Request) -> Response {
    match self.transport.fetch(request).await {
      Ok(resp) => resp,
      Err(e) => {
        debug!(url = %request.url(), error = %e, "navigation fetch failed, serving shell");
        self
          .config
          .resolve(&self.config.app_shell)
          .ok()
          .and_then(|shell_url| self.lookup(&self.tiers.static_tier, shell_url.as_str()))
          .unwrap_or_else(Response::app_unavailable)
      }
    }
  }

  /// Default strategy: cache-first with size-bounded write-through into the
  /// dynamic tier.
  async fn cache_first_dynamic(&self, request: &Request) -> Response {
    let key = request.cache_key();
    if let Some(cached) = self.lookup(&self.tiers.dynamic_tier, &key) {
      return cached;
    }

    match self.transport.fetch(request).await {
      Ok(resp) => {
        if resp.is_success() {
          self.write_dynamic(&key, &resp);
        }
        resp
      }
      Err(e) => {
        debug!(url = %request.url(), error = %e, "dynamic fetch failed with no cached entry");
        Response::unavailable(request.path())
      }
    }
  }

  /// Cache lookup. Store failures degrade to a miss so the request can still
  /// be served from the network.
  fn lookup(&self, tier: &str, key: &str) -> Option<Response> {
    match self.store.get(tier, key) {
      Ok(Some(stored)) => Some(Response {
        status: stored.entry.status,
        content_type: stored.entry.content_type,
        body: stored.entry.body,
        source: ResponseSource::Cache,
      }),
      Ok(None) => None,
      Err(e) => {
        debug!(tier, key, error = %e, "cache read failed, treating as miss");
        None
      }
    }
  }

  /// Write-through into the dynamic tier, enforcing the byte limit first.
  fn write_dynamic(&self, key: &str, resp: &Response) {
    if let Err(e) = evict::enforce_limit(
      &*self.store,
      &self.tiers.dynamic_tier,
      self.config.cache_size_limit,
      Some(key),
    ) {
      warn!(error = %e, "eviction before dynamic write failed");
    }
    self.write_through(&self.tiers.dynamic_tier, key, resp);
  }

  /// Write a response copy into a tier. The body is cloned here; the caller
  /// keeps its own copy to return. Write failures are logged and swallowed:
  /// the response is still served.
  fn write_through(&self, tier: &str, key: &str, resp: &Response) {
    let entry = CacheEntry::new(key, resp.status, resp.content_type.clone(), resp.body.clone());
    if let Err(e) = self.store.put(tier, &entry) {
      warn!(tier, key, error = %e, "cache write-through failed");
    }
  }

  pub fn tiers(&self) -> &Tiers {
    &self.tiers
  }
}
