//! Persistent storage for cached responses, keyed by cache name and URL.
//!
//! Separate database from the structured store: asset rows are disposable
//! (a version bump evicts them wholesale) while health records are not.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// Asset database file name inside the data directory.
pub const ASSETS_DB_FILE: &str = "assets.db";

/// A cached response body with enough metadata to replay it.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedAsset {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

pub struct AssetStore {
  conn: Mutex<Connection>,
}

const ASSET_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS asset_cache (
    cache_name TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    fetched_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, url)
);

CREATE INDEX IF NOT EXISTS idx_asset_cache_name ON asset_cache(cache_name);
"#;

impl AssetStore {
  /// Open (or create) the asset database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create asset cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open asset cache at {}: {}", path.display(), e))?;
    conn
      .execute_batch(ASSET_SCHEMA)
      .map_err(|e| eyre!("Failed to create asset cache schema: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Store (or refresh) an asset under the given cache name.
  pub fn put(&self, cache_name: &str, url: &str, asset: &CachedAsset) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute(
        "INSERT OR REPLACE INTO asset_cache (cache_name, url, status, content_type, body, fetched_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![cache_name, url, asset.status, asset.content_type, asset.body],
      )
      .map_err(|e| eyre!("Failed to store asset: {}", e))?;
    Ok(())
  }

  /// Exact-URL lookup.
  pub fn get(&self, cache_name: &str, url: &str) -> Result<Option<CachedAsset>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let row = conn
      .query_row(
        "SELECT status, content_type, body FROM asset_cache
         WHERE cache_name = ? AND url = ?",
        params![cache_name, url],
        |row| {
          Ok(CachedAsset {
            status: row.get(0)?,
            content_type: row.get(1)?,
            body: row.get(2)?,
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up asset: {}", e))?;
    Ok(row)
  }

  /// Lookup that ignores the query string: `base_url` must already have its
  /// query stripped, and matches rows stored either bare or with any query.
  ///
  /// LIKE wildcards in the URL (`%` from percent-encoding, `_` in paths) are
  /// escaped so only the requested URL itself can match.
  pub fn get_ignoring_query(&self, cache_name: &str, base_url: &str) -> Result<Option<CachedAsset>> {
    let escaped = base_url
      .replace('\\', "\\\\")
      .replace('%', "\\%")
      .replace('_', "\\_");
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let row = conn
      .query_row(
        "SELECT status, content_type, body FROM asset_cache
         WHERE cache_name = ? AND (url = ? OR url LIKE ? || '?%' ESCAPE '\\')
         ORDER BY fetched_at DESC LIMIT 1",
        params![cache_name, base_url, escaped],
        |row| {
          Ok(CachedAsset {
            status: row.get(0)?,
            content_type: row.get(1)?,
            body: row.get(2)?,
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up asset: {}", e))?;
    Ok(row)
  }

  /// Delete every asset not belonging to `keep`. Returns how many rows went.
  pub fn drop_other_caches(&self, keep: &str) -> Result<usize> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let dropped = conn
      .execute(
        "DELETE FROM asset_cache WHERE cache_name != ?",
        params![keep],
      )
      .map_err(|e| eyre!("Failed to drop old caches: {}", e))?;
    Ok(dropped)
  }

  /// Number of assets stored under `cache_name`.
  pub fn count(&self, cache_name: &str) -> Result<usize> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let count: usize = conn
      .query_row(
        "SELECT COUNT(*) FROM asset_cache WHERE cache_name = ?",
        params![cache_name],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count assets: {}", e))?;
    Ok(count)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn open_store() -> (tempfile::TempDir, AssetStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = AssetStore::open(&dir.path().join(ASSETS_DB_FILE)).unwrap();
    (dir, store)
  }

  fn asset(body: &str) -> CachedAsset {
    CachedAsset {
      status: 200,
      content_type: Some("text/html".to_string()),
      body: body.as_bytes().to_vec(),
    }
  }

  #[test]
  fn query_ignoring_lookup_matches_bare_and_queried_rows() {
    let (_dir, store) = open_store();

    store
      .put("shell", "http://localhost:8001/page?tab=1", &asset("queried"))
      .unwrap();
    let hit = store
      .get_ignoring_query("shell", "http://localhost:8001/page")
      .unwrap();
    assert_eq!(hit.map(|a| a.body), Some(b"queried".to_vec()));
  }

  #[test]
  fn query_ignoring_lookup_treats_like_wildcards_literally() {
    let (_dir, store) = open_store();

    // Rows whose URLs would match `a%20b` or `a_b` read as LIKE patterns.
    // They must stay invisible to those lookups.
    store
      .put("shell", "http://localhost:8001/attack20b?x=1", &asset("wrong"))
      .unwrap();
    store
      .put("shell", "http://localhost:8001/axb?x=1", &asset("wrong too"))
      .unwrap();

    let hit = store
      .get_ignoring_query("shell", "http://localhost:8001/a%20b")
      .unwrap();
    assert!(hit.is_none());
    let hit = store
      .get_ignoring_query("shell", "http://localhost:8001/a_b")
      .unwrap();
    assert!(hit.is_none());

    // The percent-encoded URL itself still matches, bare or with a query.
    store
      .put("shell", "http://localhost:8001/a%20b?x=1", &asset("right"))
      .unwrap();
    let hit = store
      .get_ignoring_query("shell", "http://localhost:8001/a%20b")
      .unwrap();
    assert_eq!(hit.map(|a| a.body), Some(b"right".to_vec()));
  }
}
