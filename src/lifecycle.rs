//! Worker lifecycle: two-phase install/activate, generation garbage
//! collection, and the cross-context message protocol.
//!
//! Activation is never an implicit side effect of installation: a freshly
//! installed worker parks in `Waiting` until `activate` runs, unless the
//! skip-waiting override is set. Install failures are fatal to that attempt
//! and leave every existing tier untouched.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::http::{Request, Response};
use crate::router::FetchRouter;
use crate::store::{CacheEntry, CacheStore, TierUsage, Tiers};
use crate::sync::SyncCoordinator;
use crate::transport::Transport;

/// Lifecycle states. `New` is the pre-install state; `Waiting` is
/// installed-but-not-yet-controlling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  New,
  Installing,
  Waiting,
  Active,
}

/// Cross-context messages from the application to the worker.
#[derive(Debug, Clone)]
pub enum WorkerMessage {
  /// Promote a waiting worker to active without waiting for clients.
  SkipWaiting,
  /// Request a per-tier usage report.
  CacheUsage,
  /// Queue application data for background sync.
  StoreOfflineData(Value),
}

/// Reply to a cross-context message.
#[derive(Debug, Clone)]
pub enum MessageReply {
  Ack,
  Usage(BTreeMap<String, TierUsage>),
}

pub struct Lifecycle<S: CacheStore, T: Transport> {
  store: Arc<S>,
  transport: Arc<T>,
  config: Arc<Config>,
  tiers: Tiers,
  router: FetchRouter<S, T>,
  coordinator: SyncCoordinator<S, T>,
  state: WorkerState,
  skip_waiting: bool,
}

impl<S: CacheStore, T: Transport> Lifecycle<S, T> {
  pub fn new(store: Arc<S>, transport: Arc<T>, config: Arc<Config>) -> Self {
    let tiers = Tiers::new(&config.cache_version);
    let router = FetchRouter::new(store.clone(), transport.clone(), config.clone());
    let coordinator = SyncCoordinator::new(store.clone(), transport.clone(), config.clone());
    Self {
      store,
      transport,
      config,
      tiers,
      router,
      coordinator,
      state: WorkerState::New,
      skip_waiting: false,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn router(&self) -> &FetchRouter<S, T> {
    &self.router
  }

  pub fn coordinator(&self) -> &SyncCoordinator<S, T> {
    &self.coordinator
  }

  /// Install: pre-populate the static tier from the asset manifest and
  /// initialize an empty offline tier.
  ///
  /// All-or-nothing: the whole manifest is fetched before anything is
  /// written, so a single missing asset aborts the attempt without shipping
  /// a partially cached shell. The previously active generation, if any,
  /// keeps serving.
  pub async fn install(&mut self) -> Result<()> {
    self.state = WorkerState::Installing;
    match self.install_inner().await {
      Ok(count) => {
        self.state = WorkerState::Waiting;
        info!(assets = count, tier = %self.tiers.static_tier, "install complete, waiting");
        if self.skip_waiting {
          self.activate().await?;
        }
        Ok(())
      }
      Err(e) => {
        self.state = WorkerState::New;
        Err(e)
      }
    }
  }

  async fn install_inner(&self) -> Result<usize> {
    let mut assets = Vec::with_capacity(self.config.asset_manifest.len());
    for path in &self.config.asset_manifest {
      let url = self.config.resolve(path)?;
      let request = Request::get(url.as_str())?;
      let resp = self
        .transport
        .fetch(&request)
        .await
        .map_err(|e| eyre!("Install aborted: failed to fetch {}: {}", path, e))?;
      if !resp.is_success() {
        return Err(eyre!("Install aborted: {} returned {}", path, resp.status));
      }
      assets.push((request.cache_key(), resp));
    }

    // Whole manifest fetched; only now is it safe to create the tier
    self.store.create_tier(&self.tiers.static_tier)?;
    for (key, resp) in &assets {
      let entry = CacheEntry::new(key, resp.status, resp.content_type.clone(), resp.body.clone());
      self.store.put(&self.tiers.static_tier, &entry)?;
    }
    self.store.create_tier(&self.tiers.offline_tier)?;

    Ok(assets.len())
  }

  /// Activate: garbage-collect previous cache generations, ensure the
  /// current generation's tiers exist, and take control of request routing.
  pub async fn activate(&mut self) -> Result<()> {
    if self.state == WorkerState::Installing {
      return Err(eyre!("Cannot activate while installing"));
    }

    for tier in self.store.tier_names()? {
      if !self.tiers.owns(&tier) {
        match self.store.delete_tier(&tier) {
          Ok(entries) => info!(tier = %tier, entries, "deleted stale cache generation"),
          Err(e) => warn!(tier = %tier, error = %e, "failed to delete stale generation"),
        }
      }
    }

    self.store.create_tier(&self.tiers.static_tier)?;
    self.store.create_tier(&self.tiers.dynamic_tier)?;
    self.store.create_tier(&self.tiers.offline_tier)?;

    self.state = WorkerState::Active;
    info!(version = %self.config.cache_version, "activated, claimed clients, registered for background-sync");
    Ok(())
  }

  /// Skip-waiting override: promote a waiting worker immediately. Recorded
  /// so an install that completes later also activates without waiting.
  pub async fn skip_waiting(&mut self) -> Result<()> {
    self.skip_waiting = true;
    if self.state == WorkerState::Waiting {
      self.activate().await?;
    }
    Ok(())
  }

  /// Route an inbound fetch. Never fails; degraded responses per the router.
  pub async fn handle_fetch(&self, request: &Request) -> Response {
    self.router.handle(request).await
  }

  /// Handle a cross-context message.
  pub async fn handle_message(&mut self, message: WorkerMessage) -> Result<MessageReply> {
    match message {
      WorkerMessage::SkipWaiting => {
        self.skip_waiting().await?;
        Ok(MessageReply::Ack)
      }
      WorkerMessage::CacheUsage => Ok(MessageReply::Usage(self.store.usage()?)),
      WorkerMessage::StoreOfflineData(data) => {
        let id = self.coordinator.queue().store(&data)?;
        info!(id = %id, "queued offline data");
        Ok(MessageReply::Ack)
      }
    }
  }

  /// Per-tier usage report, as replied to `CACHE_USAGE`.
  pub fn usage(&self) -> Result<BTreeMap<String, TierUsage>> {
    self.store.usage()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::ResponseSource;
  use crate::store::SqliteStore;
  use serde_json::json;
  use std::collections::HashMap;
  use url::Url;

  /// Transport serving canned (status, body) pairs by URL.
  struct ManifestTransport {
    responses: HashMap<String, (u16, Vec<u8>)>,
  }

  impl ManifestTransport {
    fn new(responses: Vec<(&str, u16, &[u8])>) -> Self {
      Self {
        responses: responses
          .into_iter()
          .map(|(url, status, body)| (url.to_string(), (status, body.to_vec())))
          .collect(),
      }
    }
  }

  impl Transport for ManifestTransport {
    async fn fetch(&self, request: &Request) -> color_eyre::Result<Response> {
      match self.responses.get(request.url().as_str()) {
        Some((status, body)) => Ok(Response::network(
          *status,
          Some("text/plain".to_string()),
          body.clone(),
        )),
        None => Err(eyre!("no route to {}", request.url())),
      }
    }

    async fn fetch_bypass(&self, request: &Request) -> color_eyre::Result<Response> {
      self.fetch(request).await
    }

    async fn post_json(&self, _url: &Url, _payload: &Value) -> color_eyre::Result<()> {
      Ok(())
    }
  }

  fn small_manifest_config() -> Config {
    let mut config = Config::with_base_url(Url::parse("https://app.example").unwrap());
    config.asset_manifest = vec!["/a.html".to_string(), "/b.js".to_string()];
    config
  }

  fn lifecycle(
    transport: ManifestTransport,
    config: Config,
  ) -> (Arc<SqliteStore>, Lifecycle<SqliteStore, ManifestTransport>) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let lifecycle = Lifecycle::new(store.clone(), Arc::new(transport), Arc::new(config));
    (store, lifecycle)
  }

  #[tokio::test]
  async fn test_install_populates_static_and_offline_tiers() {
    let transport = ManifestTransport::new(vec![
      ("https://app.example/a.html", 200, b"<a>"),
      ("https://app.example/b.js", 200, b"js"),
    ]);
    let (store, mut lifecycle) = lifecycle(transport, small_manifest_config());

    lifecycle.install().await.unwrap();

    assert_eq!(lifecycle.state(), WorkerState::Waiting);
    assert_eq!(store.entry_count("focusflow-v2-static").unwrap(), 2);
    assert!(store
      .tier_names()
      .unwrap()
      .contains(&"focusflow-v2-offline".to_string()));

    let shell = store
      .get("focusflow-v2-static", "https://app.example/a.html")
      .unwrap()
      .unwrap();
    assert_eq!(shell.entry.body, b"<a>");
  }

  #[tokio::test]
  async fn test_install_404_fails_without_creating_static_tier() {
    let transport = ManifestTransport::new(vec![
      ("https://app.example/a.html", 200, b"<a>"),
      ("https://app.example/b.js", 404, b"not found"),
    ]);
    let (store, mut lifecycle) = lifecycle(transport, small_manifest_config());

    let err = lifecycle.install().await.unwrap_err();
    assert!(err.to_string().contains("/b.js"));

    assert_eq!(lifecycle.state(), WorkerState::New);
    assert!(store.tier_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_failure_leaves_previous_generation_intact() {
    let transport = ManifestTransport::new(vec![("https://app.example/a.html", 200, b"<a>")]);
    let (store, mut lifecycle) = lifecycle(transport, small_manifest_config());

    // A previous generation is already serving
    store
      .put(
        "focusflow-v1-static",
        &CacheEntry::new("https://app.example/a.html", 200, None, b"old".to_vec()),
      )
      .unwrap();

    assert!(lifecycle.install().await.is_err());

    let previous = store
      .get("focusflow-v1-static", "https://app.example/a.html")
      .unwrap()
      .unwrap();
    assert_eq!(previous.entry.body, b"old");
  }

  #[tokio::test]
  async fn test_activate_deletes_only_stale_generations() {
    let transport = ManifestTransport::new(vec![]);
    let (store, mut lifecycle) = lifecycle(transport, small_manifest_config());

    for tier in ["focusflow-v1-static", "focusflow-v1-dynamic", "focusflow-v2-static"] {
      store
        .put(tier, &CacheEntry::new("https://app.example/x", 200, None, b"x".to_vec()))
        .unwrap();
    }

    lifecycle.activate().await.unwrap();

    let names = store.tier_names().unwrap();
    assert!(!names.contains(&"focusflow-v1-static".to_string()));
    assert!(!names.contains(&"focusflow-v1-dynamic".to_string()));
    assert!(names.contains(&"focusflow-v2-static".to_string()));
    // The retained generation's entries survive
    assert!(store
      .get("focusflow-v2-static", "https://app.example/x")
      .unwrap()
      .is_some());
    assert_eq!(lifecycle.state(), WorkerState::Active);
  }

  #[tokio::test]
  async fn test_skip_waiting_promotes_waiting_worker() {
    let transport = ManifestTransport::new(vec![
      ("https://app.example/a.html", 200, b"<a>"),
      ("https://app.example/b.js", 200, b"js"),
    ]);
    let (_store, mut lifecycle) = lifecycle(transport, small_manifest_config());

    lifecycle.install().await.unwrap();
    assert_eq!(lifecycle.state(), WorkerState::Waiting);

    let reply = lifecycle
      .handle_message(WorkerMessage::SkipWaiting)
      .await
      .unwrap();
    assert!(matches!(reply, MessageReply::Ack));
    assert_eq!(lifecycle.state(), WorkerState::Active);
  }

  #[tokio::test]
  async fn test_skip_waiting_before_install_activates_immediately_after() {
    let transport = ManifestTransport::new(vec![
      ("https://app.example/a.html", 200, b"<a>"),
      ("https://app.example/b.js", 200, b"js"),
    ]);
    let (_store, mut lifecycle) = lifecycle(transport, small_manifest_config());

    lifecycle.skip_waiting().await.unwrap();
    lifecycle.install().await.unwrap();
    assert_eq!(lifecycle.state(), WorkerState::Active);
  }

  #[tokio::test]
  async fn test_cache_usage_message_reports_tiers() {
    let transport = ManifestTransport::new(vec![
      ("https://app.example/a.html", 200, b"<a>"),
      ("https://app.example/b.js", 200, b"js"),
    ]);
    let (_store, mut lifecycle) = lifecycle(transport, small_manifest_config());
    lifecycle.install().await.unwrap();

    let reply = lifecycle
      .handle_message(WorkerMessage::CacheUsage)
      .await
      .unwrap();
    let MessageReply::Usage(report) = reply else {
      panic!("expected usage reply");
    };
    let static_usage = report.get("focusflow-v2-static").unwrap();
    assert_eq!(static_usage.entries, 2);
    assert_eq!(static_usage.size_bytes, 5);
  }

  #[tokio::test]
  async fn test_store_offline_data_message_queues_record() {
    let transport = ManifestTransport::new(vec![]);
    let (_store, mut lifecycle) = lifecycle(transport, small_manifest_config());

    lifecycle
      .handle_message(WorkerMessage::StoreOfflineData(json!({"session": 1})))
      .await
      .unwrap();

    let records = lifecycle.coordinator().queue().drain().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload["session"], 1);
  }

  #[tokio::test]
  async fn test_handle_fetch_serves_installed_asset_from_cache() {
    let transport = ManifestTransport::new(vec![
      ("https://app.example/a.html", 200, b"<a>"),
      ("https://app.example/b.js", 200, b"js"),
    ]);
    let (_store, mut lifecycle) = lifecycle(transport, small_manifest_config());

    lifecycle.install().await.unwrap();
    lifecycle.activate().await.unwrap();

    let req = Request::get("https://app.example/a.html").unwrap();
    let resp = lifecycle.handle_fetch(&req).await;
    assert_eq!(resp.source, ResponseSource::Cache);
    assert_eq!(resp.body, b"<a>");
  }
}
