//! Size-bounded eviction for the dynamic tier.
//!
//! The engine runs one pass per invocation: measure the tier, and if it is
//! over its byte limit remove the oldest quarter of its entries. "Oldest" is
//! an approximation of recency, not true LRU: entries carrying a `timestamp=`
//! query parameter sort by it, the rest sort lexicographically by URL.
//!
//! Known limitation: a single pass may leave the tier over limit when one
//! entry dominates the total (e.g. a single oversized blob). The engine never
//! loops; the periodic safety-net timer picks up the remainder on a later
//! invocation.

use color_eyre::Result;
use tracing::debug;
use url::Url;

use crate::store::CacheStore;

/// Enforce the byte limit on a tier with a single removal pass.
///
/// `incoming_key` is the entry about to be written; it is never selected for
/// removal. Returns the number of entries removed.
pub fn enforce_limit<S: CacheStore>(
  store: &S,
  tier: &str,
  limit: u64,
  incoming_key: Option<&str>,
) -> Result<usize> {
  // Full-tier scan per invocation; no running size counter is kept.
  let total = store.total_bytes(tier)?;
  if total <= limit {
    return Ok(0);
  }

  let keys = store.keys(tier)?;
  if keys.is_empty() {
    return Ok(0);
  }

  let remove_count = keys.len() / 4;
  if remove_count == 0 {
    return Ok(0);
  }

  let mut candidates: Vec<String> = keys
    .into_iter()
    .filter(|k| Some(k.as_str()) != incoming_key)
    .collect();
  candidates.sort_by(|a, b| {
    (entry_timestamp(a), a.as_str()).cmp(&(entry_timestamp(b), b.as_str()))
  });

  let mut removed = 0;
  for key in candidates.iter().take(remove_count) {
    if store.delete(tier, key)? {
      removed += 1;
    }
  }

  debug!(
    tier,
    total_bytes = total,
    limit,
    removed,
    "evicted oldest entries from over-limit tier"
  );

  Ok(removed)
}

/// Best-effort insertion timestamp from a `timestamp=` query parameter.
/// Entries without one sort as oldest (0) and fall back to URL order.
fn entry_timestamp(key: &str) -> u64 {
  Url::parse(key)
    .ok()
    .and_then(|url| {
      url
        .query_pairs()
        .find(|(name, _)| name == "timestamp")
        .and_then(|(_, value)| value.parse().ok())
    })
    .unwrap_or(0)
}
