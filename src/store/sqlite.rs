//! SQLite-backed implementation of the tiered cache store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::traits::{CacheEntry, CacheStore, StoredEntry};

/// SQLite-based cache store. All tiers live in one database; per-key
/// operations are serialized behind the connection mutex.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open or create the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// In-memory store, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("ffsw").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the tiered cache store.
const STORE_SCHEMA: &str = r#"
-- Tier registry; a tier exists from creation until delete_tier, even empty
CREATE TABLE IF NOT EXISTS tiers (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per cached response; seq is a store-wide monotonic insertion counter
CREATE TABLE IF NOT EXISTS cache_entries (
    tier TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    byte_size INTEGER NOT NULL,
    seq INTEGER NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (tier, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_seq ON cache_entries(tier, seq);
"#;

impl CacheStore for SqliteStore {
  fn create_tier(&self, tier: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("INSERT OR IGNORE INTO tiers (name) VALUES (?)", params![tier])
      .map_err(|e| eyre!("Failed to create tier {}: {}", tier, e))?;

    Ok(())
  }

  fn put(&self, tier: &str, entry: &CacheEntry) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("INSERT OR IGNORE INTO tiers (name) VALUES (?)", params![tier])
      .map_err(|e| eyre!("Failed to register tier {}: {}", tier, e))?;

    // Replacing an entry assigns a fresh seq, so seq order tracks insertion
    // order even across overwrites.
    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries
         (tier, request_key, status, content_type, body, byte_size, seq, stored_at)
         VALUES (?, ?, ?, ?, ?, ?,
                 (SELECT IFNULL(MAX(seq), 0) + 1 FROM cache_entries),
                 datetime('now'))",
        params![
          tier,
          entry.request_key,
          entry.status,
          entry.content_type,
          entry.body,
          entry.byte_size(),
        ],
      )
      .map_err(|e| eyre!("Failed to store entry {}: {}", entry.request_key, e))?;

    Ok(())
  }

  fn get(&self, tier: &str, request_key: &str) -> Result<Option<StoredEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row = conn
      .query_row(
        "SELECT status, content_type, body, seq, stored_at FROM cache_entries
         WHERE tier = ? AND request_key = ?",
        params![tier, request_key],
        |row| {
          Ok((
            row.get::<_, u16>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Vec<u8>>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read entry {}: {}", request_key, e))?;

    match row {
      Some((status, content_type, body, seq, stored_at_str)) => {
        let stored_at = parse_datetime(&stored_at_str)?;
        Ok(Some(StoredEntry {
          entry: CacheEntry::new(request_key, status, content_type, body),
          seq,
          stored_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn delete(&self, tier: &str, request_key: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let deleted = conn
      .execute(
        "DELETE FROM cache_entries WHERE tier = ? AND request_key = ?",
        params![tier, request_key],
      )
      .map_err(|e| eyre!("Failed to delete entry {}: {}", request_key, e))?;

    Ok(deleted > 0)
  }

  fn keys(&self, tier: &str) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT request_key FROM cache_entries WHERE tier = ? ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare key query: {}", e))?;

    let keys = stmt
      .query_map(params![tier], |row| row.get(0))
      .map_err(|e| eyre!("Failed to enumerate keys: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(keys)
  }

  fn entry_count(&self, tier: &str) -> Result<u64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE tier = ?",
        params![tier],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries: {}", e))?;

    Ok(count as u64)
  }

  fn total_bytes(&self, tier: &str) -> Result<u64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let total: i64 = conn
      .query_row(
        "SELECT IFNULL(SUM(byte_size), 0) FROM cache_entries WHERE tier = ?",
        params![tier],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to sum entry sizes: {}", e))?;

    Ok(total as u64)
  }

  fn tier_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM tiers ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare tier query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to enumerate tiers: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete_tier(&self, tier: &str) -> Result<u64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let deleted = conn
      .execute("DELETE FROM cache_entries WHERE tier = ?", params![tier])
      .map_err(|e| eyre!("Failed to clear tier {}: {}", tier, e))?;

    conn
      .execute("DELETE FROM tiers WHERE name = ?", params![tier])
      .map_err(|e| eyre!("Failed to drop tier {}: {}", tier, e))?;

    Ok(deleted as u64)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(key: &str, body: &[u8]) -> CacheEntry {
    CacheEntry::new(key, 200, Some("text/plain".to_string()), body.to_vec())
  }

  #[test]
  fn test_put_get_roundtrip() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.put("focusflow-v2-static", &entry("https://a/x", b"hello")).unwrap();

    let stored = store.get("focusflow-v2-static", "https://a/x").unwrap().unwrap();
    assert_eq!(stored.entry.body, b"hello");
    assert_eq!(stored.entry.status, 200);
  }

  #[test]
  fn test_put_is_idempotent_overwrite() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.put("t", &entry("https://a/x", b"one")).unwrap();
    store.put("t", &entry("https://a/x", b"two")).unwrap();

    assert_eq!(store.entry_count("t").unwrap(), 1);
    let stored = store.get("t", "https://a/x").unwrap().unwrap();
    assert_eq!(stored.entry.body, b"two");
  }

  #[test]
  fn test_keys_in_insertion_order() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.put("t", &entry("https://a/c", b"1")).unwrap();
    store.put("t", &entry("https://a/a", b"2")).unwrap();
    store.put("t", &entry("https://a/b", b"3")).unwrap();

    assert_eq!(
      store.keys("t").unwrap(),
      vec!["https://a/c", "https://a/a", "https://a/b"]
    );
  }

  #[test]
  fn test_overwrite_moves_key_to_newest() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.put("t", &entry("https://a/a", b"1")).unwrap();
    store.put("t", &entry("https://a/b", b"2")).unwrap();
    store.put("t", &entry("https://a/a", b"3")).unwrap();

    assert_eq!(store.keys("t").unwrap(), vec!["https://a/b", "https://a/a"]);
  }

  #[test]
  fn test_total_bytes_sums_bodies() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.put("t", &entry("https://a/a", &[0u8; 10])).unwrap();
    store.put("t", &entry("https://a/b", &[0u8; 30])).unwrap();

    assert_eq!(store.total_bytes("t").unwrap(), 40);
  }

  #[test]
  fn test_empty_tier_visible_until_dropped() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.create_tier("focusflow-v2-offline").unwrap();

    assert_eq!(store.tier_names().unwrap(), vec!["focusflow-v2-offline"]);
    assert_eq!(store.entry_count("focusflow-v2-offline").unwrap(), 0);

    store.delete_tier("focusflow-v2-offline").unwrap();
    assert!(store.tier_names().unwrap().is_empty());
  }

  #[test]
  fn test_delete_tier_removes_entries() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.put("t1", &entry("https://a/a", b"1")).unwrap();
    store.put("t1", &entry("https://a/b", b"2")).unwrap();
    store.put("t2", &entry("https://a/a", b"3")).unwrap();

    assert_eq!(store.delete_tier("t1").unwrap(), 2);
    assert!(store.get("t1", "https://a/a").unwrap().is_none());
    assert!(store.get("t2", "https://a/a").unwrap().is_some());
  }

  #[test]
  fn test_usage_report_shape() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.put("t", &entry("https://a/a", &[0u8; 1024])).unwrap();

    let report = store.usage().unwrap();
    let usage = report.get("t").unwrap();
    assert_eq!(usage.entries, 1);
    assert_eq!(usage.size_bytes, 1024);
    assert!(usage.size_mb < 0.01 + f64::EPSILON);
  }
}
