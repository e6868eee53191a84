//! Background sync coordinator.
//!
//! Invoked when connectivity returns (or manually). Three phases, each
//! independently fault-tolerant: a failure in one is logged and never aborts
//! the others. Delivery is at-least-once; the remote endpoints dedup by
//! record id/digest.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::evict;
use crate::offline::OfflineQueue;
use crate::store::{CacheEntry, CacheStore, Tiers};
use crate::transport::Transport;

/// Outcome of one sync cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
  pub records_sent: usize,
  pub records_failed: usize,
  pub activity_synced: bool,
  pub assets_refreshed: usize,
}

pub struct SyncCoordinator<S: CacheStore, T: Transport> {
  store: Arc<S>,
  transport: Arc<T>,
  config: Arc<Config>,
  queue: OfflineQueue<S>,
  tiers: Tiers,
}

impl<S: CacheStore, T: Transport> SyncCoordinator<S, T> {
  pub fn new(store: Arc<S>, transport: Arc<T>, config: Arc<Config>) -> Self {
    let tiers = Tiers::new(&config.cache_version);
    let queue = OfflineQueue::new(
      store.clone(),
      tiers.offline_tier.clone(),
      config.max_offline_entries,
    );
    Self {
      store,
      transport,
      config,
      queue,
      tiers,
    }
  }

  pub fn queue(&self) -> &OfflineQueue<S> {
    &self.queue
  }

  /// Run one full sync cycle: drain the queue, sync the activity record,
  /// refresh critical assets.
  pub async fn sync(&self) -> SyncReport {
    let mut report = SyncReport::default();
    self.drain_queue(&mut report).await;
    self.sync_activity(&mut report).await;
    self.refresh_critical_assets(&mut report).await;
    info!(
      sent = report.records_sent,
      failed = report.records_failed,
      activity = report.activity_synced,
      assets = report.assets_refreshed,
      "sync cycle complete"
    );
    report
  }

  /// Phase 1: POST each queued record, deleting it only after confirmed
  /// transmission. A failed record stays queued for the next cycle.
  async fn drain_queue(&self, report: &mut SyncReport) {
    let records = match self.queue.drain() {
      Ok(records) => records,
      Err(e) => {
        warn!(error = %e, "failed to drain offline queue");
        return;
      }
    };
    if records.is_empty() {
      return;
    }

    let endpoint = match self.config.resolve(&self.config.sync_endpoint) {
      Ok(url) => url,
      Err(e) => {
        warn!(error = %e, "invalid sync endpoint");
        return;
      }
    };

    for record in records {
      let envelope = json!({
        "id": record.id,
        "enqueuedAt": record.enqueued_at.to_rfc3339(),
        "payload": record.payload,
      });
      match self.transport.post_json(&endpoint, &envelope).await {
        Ok(()) => {
          if let Err(e) = self.queue.delete(&record.id) {
            warn!(id = %record.id, error = %e, "failed to delete synced record");
          }
          report.records_sent += 1;
        }
        Err(e) => {
          warn!(id = %record.id, error = %e, "record sync failed, will retry next cycle");
          report.records_failed += 1;
        }
      }
    }
  }

  /// Phase 2: POST the accumulated activity record, clearing it only on
  /// success.
  async fn sync_activity(&self, report: &mut SyncReport) {
    let activity = match self.queue.activity() {
      Ok(Some(activity)) => activity,
      Ok(None) => return,
      Err(e) => {
        warn!(error = %e, "failed to read activity record");
        return;
      }
    };

    let endpoint = match self.config.resolve(&self.config.activity_endpoint) {
      Ok(url) => url,
      Err(e) => {
        warn!(error = %e, "invalid activity endpoint");
        return;
      }
    };

    match self.transport.post_json(&endpoint, &activity).await {
      Ok(()) => {
        if let Err(e) = self.queue.clear_activity() {
          warn!(error = %e, "failed to clear synced activity record");
        }
        report.activity_synced = true;
      }
      Err(e) => {
        warn!(error = %e, "activity sync failed, record retained");
      }
    }
  }

  /// Phase 3: re-fetch critical assets with cache bypass and overwrite the
  /// static tier. Best-effort per asset.
  async fn refresh_critical_assets(&self, report: &mut SyncReport) {
    for path in &self.config.critical_assets {
      let url = match self.config.resolve(path) {
        Ok(url) => url,
        Err(e) => {
          warn!(path = %path, error = %e, "skipping unresolvable critical asset");
          continue;
        }
      };
      let request = match crate::http::Request::get(url.as_str()) {
        Ok(request) => request,
        Err(e) => {
          warn!(path = %path, error = %e, "skipping invalid critical asset");
          continue;
        }
      };

      match self.transport.fetch_bypass(&request).await {
        Ok(resp) if resp.is_success() => {
          let entry = CacheEntry::new(
            request.cache_key(),
            resp.status,
            resp.content_type.clone(),
            resp.body,
          );
          if let Err(e) = self.store.put(&self.tiers.static_tier, &entry) {
            warn!(path = %path, error = %e, "failed to store refreshed asset");
          } else {
            report.assets_refreshed += 1;
          }
        }
        Ok(resp) => {
          warn!(path = %path, status = resp.status, "critical asset refresh rejected");
        }
        Err(e) => {
          warn!(path = %path, error = %e, "critical asset refresh failed");
        }
      }
    }
  }

  /// Eviction safety net outside the request path: cache-first requests only
  /// evict on write, so an idle dynamic tier is re-bounded here.
  pub fn evict_dynamic(&self) {
    match evict::enforce_limit(
      &*self.store,
      &self.tiers.dynamic_tier,
      self.config.cache_size_limit,
      None,
    ) {
      Ok(0) => {}
      Ok(removed) => debug!(removed, "periodic eviction removed entries"),
      Err(e) => warn!(error = %e, "periodic eviction failed"),
    }
  }

  /// Daemon loop: periodic eviction (60s default) and periodic sync cycles.
  /// Runs until the enclosing task is dropped.
  pub async fn run_periodic(&self) {
    let mut evict_timer =
      tokio::time::interval(Duration::from_secs(self.config.eviction_interval_secs.max(1)));
    let mut sync_timer =
      tokio::time::interval(Duration::from_secs(self.config.sync_interval_secs.max(1)));

    loop {
      tokio::select! {
        _ = evict_timer.tick() => self.evict_dynamic(),
        _ = sync_timer.tick() => {
          self.sync().await;
        }
      }
    }
  }
}
