//! Request and response value types shared by the router, store and transport.
//!
//! Responses carry their full body as bytes so a single response can be both
//! returned to the caller and written into a cache tier (the body is cloned
//! before storage, never shared).

use color_eyre::{eyre::eyre, Result};
use serde_json::json;
use url::Url;

/// An inbound request to be routed.
///
/// The canonical cache key for a request is its URL with the fragment
/// stripped; two requests with the same key are interchangeable for caching.
#[derive(Debug, Clone)]
pub struct Request {
  url: Url,
  /// Top-level document load (navigation) rather than a subresource fetch.
  navigation: bool,
}

impl Request {
  /// Build a subresource request from an absolute URL.
  pub fn get(url: &str) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid request URL {}: {}", url, e))?;
    Ok(Self {
      url,
      navigation: false,
    })
  }

  /// Build a top-level navigation request.
  pub fn navigate(url: &str) -> Result<Self> {
    let mut req = Self::get(url)?;
    req.navigation = true;
    Ok(req)
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  pub fn path(&self) -> &str {
    self.url.path()
  }

  pub fn is_navigation(&self) -> bool {
    self.navigation
  }

  /// Canonical cache key: the URL without its fragment.
  pub fn cache_key(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    url.to_string()
  }

  /// Asset category used to pick an offline fallback.
  pub fn asset_kind(&self) -> AssetKind {
    AssetKind::from_path(self.path())
  }
}

/// Coarse asset categories for fallback selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
  Audio,
  Image,
  Other,
}

impl AssetKind {
  pub fn from_path(path: &str) -> Self {
    let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
      "mp3" | "wav" | "ogg" | "m4a" => AssetKind::Audio,
      "png" | "jpg" | "jpeg" | "gif" | "svg" | "ico" | "webp" => AssetKind::Image,
      _ => AssetKind::Other,
    }
  }
}

/// Best-effort content type for a path, used for synthesized responses.
pub fn content_type_for_path(path: &str) -> &'static str {
  let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
  match ext.as_str() {
    "html" => "text/html",
    "css" => "text/css",
    "js" => "application/javascript",
    "json" => "application/json",
    "png" => "image/png",
    "jpg" | "jpeg" => "image/jpeg",
    "svg" => "image/svg+xml",
    "ico" => "image/x-icon",
    "mp3" => "audio/mpeg",
    "wav" => "audio/wav",
    "ogg" => "audio/ogg",
    "m4a" => "audio/mp4",
    _ => "application/octet-stream",
  }
}

/// Where a routed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// Served from a cache tier
  Cache,
  /// Synthesized locally because both network and cache failed
  Fallback,
}

/// A response as seen by the router and the cache store.
#[derive(Debug, Clone)]
pub struct Response {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
  pub source: ResponseSource,
}

impl Response {
  /// A response as received from the network, any status.
  pub fn network(status: u16, content_type: Option<String>, body: Vec<u8>) -> Self {
    Self {
      status,
      content_type,
      body,
      source: ResponseSource::Network,
    }
  }

  pub fn is_success(&self) -> bool {
    self.status == 200
  }

  /// Synthesized JSON error for API requests with no network and no cache.
  pub fn offline_error(message: &str) -> Self {
    let body = json!({ "error": "Offline", "message": message });
    Self {
      status: 503,
      content_type: Some("application/json".to_string()),
      body: serde_json::to_vec(&body).unwrap_or_default(),
      source: ResponseSource::Fallback,
    }
  }

  /// Zero-length audio placeholder so playback call sites never hard-fail.
  pub fn audio_placeholder(path: &str) -> Self {
    let content_type = match AssetKind::from_path(path) {
      AssetKind::Audio => content_type_for_path(path),
      _ => "audio/mpeg",
    };
    Self {
      status: 200,
      content_type: Some(content_type.to_string()),
      body: Vec::new(),
      source: ResponseSource::Fallback,
    }
  }

  /// Synthesized response for an asset that is unavailable offline.
  pub fn unavailable(path: &str) -> Self {
    Self {
      status: 503,
      content_type: Some("text/plain".to_string()),
      body: format!("{} is unavailable offline", path).into_bytes(),
      source: ResponseSource::Fallback,
    }
  }

  /// Synthesized page shown when navigation fails and no app shell is cached.
  pub fn app_unavailable() -> Self {
    Self {
      status: 503,
      content_type: Some("text/html".to_string()),
      body: b"<!DOCTYPE html><html><body><h1>FocusFlow is unavailable offline</h1></body></html>"
        .to_vec(),
      source: ResponseSource::Fallback,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_key_strips_fragment() {
    let req = Request::get("https://app.example/page?a=1#section").unwrap();
    assert_eq!(req.cache_key(), "https://app.example/page?a=1");
  }

  #[test]
  fn test_asset_kind_from_path() {
    assert_eq!(AssetKind::from_path("/sounds/rain.mp3"), AssetKind::Audio);
    assert_eq!(AssetKind::from_path("/icons/icon-192.png"), AssetKind::Image);
    assert_eq!(AssetKind::from_path("/app.js"), AssetKind::Other);
  }

  #[test]
  fn test_network_constructor_tags_source() {
    let resp = Response::network(404, Some("text/plain".to_string()), b"gone".to_vec());
    assert_eq!(resp.status, 404);
    assert!(!resp.is_success());
    assert_eq!(resp.source, ResponseSource::Network);
  }

  #[test]
  fn test_offline_error_shape() {
    let resp = Response::offline_error("No connection");
    assert_eq!(resp.status, 503);
    let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(body["error"], "Offline");
    assert_eq!(body["message"], "No connection");
  }

  #[test]
  fn test_audio_placeholder_keeps_content_type() {
    let resp = Response::audio_placeholder("/sounds/rain.ogg");
    assert_eq!(resp.status, 200);
    assert!(resp.body.is_empty());
    assert_eq!(resp.content_type.as_deref(), Some("audio/ogg"));
  }
}
