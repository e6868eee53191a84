//! Core trait and types for the tiered cache store.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::Serialize;
use std::collections::BTreeMap;

/// A cached response keyed by canonical request identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  /// Canonical request key (URL with fragment stripped)
  pub request_key: String,
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl CacheEntry {
  pub fn new(request_key: impl Into<String>, status: u16, content_type: Option<String>, body: Vec<u8>) -> Self {
    Self {
      request_key: request_key.into(),
      status,
      content_type,
      body,
    }
  }

  pub fn byte_size(&self) -> u64 {
    self.body.len() as u64
  }
}

/// A cache entry together with its storage metadata.
#[derive(Debug, Clone)]
pub struct StoredEntry {
  pub entry: CacheEntry,
  /// Monotonic insertion counter; lower means inserted earlier. Replacing an
  /// entry assigns a fresh value.
  pub seq: i64,
  pub stored_at: DateTime<Utc>,
}

/// Usage snapshot for one tier, shaped like the `CACHE_USAGE` reply.
#[derive(Debug, Clone, Serialize)]
pub struct TierUsage {
  pub entries: u64,
  #[serde(rename = "sizeBytes")]
  pub size_bytes: u64,
  #[serde(rename = "sizeMB")]
  pub size_mb: f64,
}

/// Trait for tiered cache storage backends.
///
/// Tiers are named partitions; a tier holds at most one entry per request
/// key and `put` is an idempotent overwrite. Per-key operations are atomic
/// but nothing is transactional across keys. By convention each tier has a
/// single writing component; the store does not enforce this.
pub trait CacheStore: Send + Sync {
  /// Ensure a tier exists, empty if new.
  fn create_tier(&self, tier: &str) -> Result<()>;

  /// Insert or replace an entry. Creates the tier if needed.
  fn put(&self, tier: &str, entry: &CacheEntry) -> Result<()>;

  /// Look up an entry by request key.
  fn get(&self, tier: &str, request_key: &str) -> Result<Option<StoredEntry>>;

  /// Delete an entry. Returns whether it existed.
  fn delete(&self, tier: &str, request_key: &str) -> Result<bool>;

  /// All request keys in the tier, oldest insertion first.
  fn keys(&self, tier: &str) -> Result<Vec<String>>;

  fn entry_count(&self, tier: &str) -> Result<u64>;

  /// Total byte size of all bodies in the tier. Full-tier scan; callers
  /// accept the O(n) cost per invocation.
  fn total_bytes(&self, tier: &str) -> Result<u64>;

  /// All known tier names, including empty tiers.
  fn tier_names(&self) -> Result<Vec<String>>;

  /// Drop a tier and all its entries. Returns the number of entries removed.
  fn delete_tier(&self, tier: &str) -> Result<u64>;

  /// Usage report across all tiers.
  fn usage(&self) -> Result<BTreeMap<String, TierUsage>> {
    let mut report = BTreeMap::new();
    for tier in self.tier_names()? {
      let entries = self.entry_count(&tier)?;
      let size_bytes = self.total_bytes(&tier)?;
      let size_mb = (size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;
      report.insert(
        tier,
        TierUsage {
          entries,
          size_bytes,
          size_mb,
        },
      );
    }
    Ok(report)
  }
}
