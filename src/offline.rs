//! Offline queue: application data parked in the `offline` tier while the
//! network is down, drained by the sync coordinator once it returns.
//!
//! Records are keyed by a timestamp-derived id carrying a short content
//! digest, so a duplicate payload stored in the same millisecond collapses
//! into one record and the remote endpoint can dedup redelivered records by
//! digest. Ordering uses the store's explicit insertion counter, not key
//! enumeration order.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use crate::store::{CacheEntry, CacheStore};

/// Distinguished key for the accumulated activity record. Never bulk-cleared
/// by queue eviction or drain; only `clear_activity` removes it.
pub const ACTIVITY_KEY: &str = "activity-data";

/// A queued offline record as returned by `drain`.
#[derive(Debug, Clone)]
pub struct OfflineRecord {
  pub id: String,
  pub payload: Value,
  pub enqueued_at: DateTime<Utc>,
}

/// Count-bounded queue of JSON records in the `offline` tier.
pub struct OfflineQueue<S: CacheStore> {
  store: Arc<S>,
  tier: String,
  max_entries: usize,
}

impl<S: CacheStore> OfflineQueue<S> {
  pub fn new(store: Arc<S>, tier: impl Into<String>, max_entries: usize) -> Self {
    Self {
      store,
      tier: tier.into(),
      max_entries,
    }
  }

  /// Persist a payload under a fresh timestamp-derived id.
  ///
  /// If the queue already holds `max_entries` records the oldest one (lowest
  /// insertion seq) is removed first. The activity record neither counts
  /// toward the ceiling nor is eligible for this eviction.
  pub fn store(&self, payload: &Value) -> Result<String> {
    let body =
      serde_json::to_vec(payload).map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    let mut hasher = Sha256::new();
    hasher.update(&body);
    let digest = hex::encode(hasher.finalize());
    let id = format!("rec-{}-{}", Utc::now().timestamp_millis(), &digest[..8]);

    let queue_keys = self.queue_keys()?;
    if queue_keys.len() >= self.max_entries {
      if let Some(oldest) = queue_keys.first() {
        self.store.delete(&self.tier, oldest)?;
        debug!(tier = %self.tier, key = %oldest, "evicted oldest offline record");
      }
    }

    let entry = CacheEntry::new(&id, 200, Some("application/json".to_string()), body);
    self.store.put(&self.tier, &entry)?;

    Ok(id)
  }

  /// All queued records, oldest first. Does not delete anything: the caller
  /// deletes each record only after confirmed transmission, so a crash
  /// mid-drain leaves unacknowledged records intact for retry.
  pub fn drain(&self) -> Result<Vec<OfflineRecord>> {
    let mut records = Vec::new();
    for key in self.queue_keys()? {
      let Some(stored) = self.store.get(&self.tier, &key)? else {
        continue;
      };
      match serde_json::from_slice(&stored.entry.body) {
        Ok(payload) => records.push(OfflineRecord {
          id: key,
          payload,
          enqueued_at: stored.stored_at,
        }),
        Err(e) => {
          // Corrupt record: skip it rather than blocking the drain
          debug!(key = %key, error = %e, "skipping unparseable offline record");
        }
      }
    }
    Ok(records)
  }

  /// Delete one record after confirmed transmission.
  pub fn delete(&self, record_id: &str) -> Result<bool> {
    self.store.delete(&self.tier, record_id)
  }

  /// Number of queued records, excluding the activity record.
  pub fn len(&self) -> Result<usize> {
    Ok(self.queue_keys()?.len())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.queue_keys()?.is_empty())
  }

  /// Overwrite the accumulated activity record. Latest snapshot wins.
  pub fn store_activity(&self, payload: &Value) -> Result<()> {
    let body =
      serde_json::to_vec(payload).map_err(|e| eyre!("Failed to serialize activity: {}", e))?;
    let entry = CacheEntry::new(ACTIVITY_KEY, 200, Some("application/json".to_string()), body);
    self.store.put(&self.tier, &entry)
  }

  /// The current activity record, if any.
  pub fn activity(&self) -> Result<Option<Value>> {
    let Some(stored) = self.store.get(&self.tier, ACTIVITY_KEY)? else {
      return Ok(None);
    };
    let payload = serde_json::from_slice(&stored.entry.body)
      .map_err(|e| eyre!("Failed to parse activity record: {}", e))?;
    Ok(Some(payload))
  }

  /// Explicitly remove the activity record (after confirmed sync).
  pub fn clear_activity(&self) -> Result<bool> {
    self.store.delete(&self.tier, ACTIVITY_KEY)
  }

  /// Queue keys in insertion order, excluding the activity record.
  fn queue_keys(&self) -> Result<Vec<String>> {
    Ok(
      self
        .store
        .keys(&self.tier)?
        .into_iter()
        .filter(|k| k != ACTIVITY_KEY)
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::SqliteStore;
  use serde_json::json;

  fn queue(max: usize) -> OfflineQueue<SqliteStore> {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    OfflineQueue::new(store, "focusflow-v2-offline", max)
  }

  #[test]
  fn test_store_and_drain_roundtrip() {
    let queue = queue(10);
    queue.store(&json!({"session": 1})).unwrap();
    queue.store(&json!({"session": 2})).unwrap();

    let records = queue.drain().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].payload["session"], 1);
    assert_eq!(records[1].payload["session"], 2);
  }

  #[test]
  fn test_drain_does_not_delete() {
    let queue = queue(10);
    queue.store(&json!({"a": 1})).unwrap();

    assert_eq!(queue.drain().unwrap().len(), 1);
    assert_eq!(queue.drain().unwrap().len(), 1);
  }

  #[test]
  fn test_ceiling_evicts_oldest_first() {
    let queue = queue(3);
    let first = queue.store(&json!({"n": 0})).unwrap();
    for n in 1..=3 {
      queue.store(&json!({ "n": n })).unwrap();
    }

    // 4 stores against a ceiling of 3: the first record is gone
    assert_eq!(queue.len().unwrap(), 3);
    let records = queue.drain().unwrap();
    assert!(records.iter().all(|r| r.id != first));
    assert_eq!(records[0].payload["n"], 1);
  }

  #[test]
  fn test_max_plus_one_stores_retain_exactly_max() {
    let max = 5;
    let queue = queue(max);
    for n in 0..=max {
      queue.store(&json!({ "n": n })).unwrap();
    }
    assert_eq!(queue.len().unwrap(), max);
  }

  #[test]
  fn test_activity_record_exempt_from_eviction_and_drain() {
    let queue = queue(2);
    queue.store_activity(&json!({"minutes": 50})).unwrap();
    for n in 0..5 {
      queue.store(&json!({ "n": n })).unwrap();
    }

    // Activity survives queue churn and never appears in drain output
    assert!(queue.drain().unwrap().iter().all(|r| r.id != ACTIVITY_KEY));
    assert_eq!(queue.activity().unwrap().unwrap()["minutes"], 50);
    assert_eq!(queue.len().unwrap(), 2);
  }

  #[test]
  fn test_activity_overwrite_and_clear() {
    let queue = queue(10);
    queue.store_activity(&json!({"minutes": 10})).unwrap();
    queue.store_activity(&json!({"minutes": 25})).unwrap();

    assert_eq!(queue.activity().unwrap().unwrap()["minutes"], 25);
    assert!(queue.clear_activity().unwrap());
    assert!(queue.activity().unwrap().is_none());
  }

  #[test]
  fn test_delete_single_record() {
    let queue = queue(10);
    let id = queue.store(&json!({"a": 1})).unwrap();
    queue.store(&json!({"b": 2})).unwrap();

    assert!(queue.delete(&id).unwrap());
    let remaining = queue.drain().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].payload["b"], 2);
  }
}
