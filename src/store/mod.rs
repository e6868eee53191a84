//! Tiered cache store: named, versioned partitions holding cached responses.
//!
//! Three tiers exist per cache generation: `static` (app-shell assets),
//! `dynamic` (runtime-fetched responses) and `offline` (queued application
//! data). Tier names embed the generation tag so activation can garbage-
//! collect previous generations by prefix mismatch.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{CacheEntry, CacheStore, StoredEntry, TierUsage};

/// The three logical cache tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierKind {
  Static,
  Dynamic,
  Offline,
}

impl TierKind {
  pub fn suffix(self) -> &'static str {
    match self {
      TierKind::Static => "static",
      TierKind::Dynamic => "dynamic",
      TierKind::Offline => "offline",
    }
  }
}

/// Resolved tier names for one cache generation.
#[derive(Debug, Clone)]
pub struct Tiers {
  version: String,
  pub static_tier: String,
  pub dynamic_tier: String,
  pub offline_tier: String,
}

impl Tiers {
  pub fn new(cache_version: &str) -> Self {
    Self {
      version: cache_version.to_string(),
      static_tier: tier_name(cache_version, TierKind::Static),
      dynamic_tier: tier_name(cache_version, TierKind::Dynamic),
      offline_tier: tier_name(cache_version, TierKind::Offline),
    }
  }

  /// Prefix shared by every tier of this generation, including the
  /// separating dash so "v2" never matches "v21-static".
  pub fn generation_prefix(&self) -> String {
    format!("{}-", self.version)
  }

  /// Whether a tier name belongs to this generation.
  pub fn owns(&self, tier: &str) -> bool {
    tier.starts_with(&self.generation_prefix())
  }
}

/// `{version}-{suffix}` tier naming convention.
pub fn tier_name(cache_version: &str, kind: TierKind) -> String {
  format!("{}-{}", cache_version, kind.suffix())
}
