//! Durable, versioned local persistence with point-insert and ordered,
//! filtered index scans.
//!
//! Records are kept as serialized JSON next to mirrored index columns, so a
//! scan walks rows in index order and only decodes what it visits. The lone
//! read primitive is [`Store::query_index`]; every feature query (latest by
//! type, date range, latest N) is a parameterization of it.

pub mod schema;

mod error;
mod record;

pub use error::StoreError;
pub use record::Record;

use rusqlite::{params, Connection, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

use schema::CollectionDef;

/// Iteration direction over an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Ascending,
  /// Most recent first when scanning `by_ts`.
  Descending,
}

/// Parameters for an index scan.
///
/// The walk is lazy: for each visited record, `stop_when` ends the walk
/// immediately, then `filter` gates inclusion, then `limit` (0 = unlimited)
/// ends the walk once enough records are accumulated. `stop_when` is an
/// optimization for bounded time-range scans over the ordered `by_ts` index,
/// not a correctness requirement.
pub struct QueryOptions<'a, T> {
  pub direction: Direction,
  pub limit: usize,
  pub filter: Option<&'a dyn Fn(&T) -> bool>,
  pub stop_when: Option<&'a dyn Fn(&T) -> bool>,
}

impl<T> Default for QueryOptions<'_, T> {
  fn default() -> Self {
    Self {
      direction: Direction::Descending,
      limit: 0,
      filter: None,
      stop_when: None,
    }
  }
}

/// Handle to the structured store.
///
/// Cheap to clone; clones share the same underlying connection. There is no
/// teardown path: the connection lives for the process lifetime.
#[derive(Clone)]
pub struct Store {
  conn: Arc<Mutex<Connection>>,
  schema: &'static [CollectionDef],
}

impl Store {
  /// Open (or create) the database at `path` and apply pending migrations.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    Self::open_with(path, schema::SCHEMA, schema::SCHEMA_VERSION)
  }

  fn open_with(
    path: &Path,
    schema: &'static [CollectionDef],
    version: i32,
  ) -> Result<Self, StoreError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let mut conn = Connection::open(path)?;
    migrate(&mut conn, schema, version)?;

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
      schema,
    })
  }

  fn collection(&self, name: &str) -> Result<&'static CollectionDef, StoreError> {
    schema::collection(self.schema, name)
      .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))
  }

  /// Insert `record` into `collection`, keyed by its id.
  ///
  /// Returns the inserted record only after the transaction has committed;
  /// a partial commit is a failure, since the collection is open to multiple
  /// competing writers. Fails with [`StoreError::DuplicateKey`] if the key
  /// already exists.
  pub fn add<T: Record>(&self, collection: &str, record: &T) -> Result<T, StoreError> {
    let def = self.collection(collection)?;
    record.verify()?;

    let data = serde_json::to_vec(record).map_err(|e| StoreError::InvalidEntry {
      kind: record.kind(),
      reason: format!("not serializable: {e}"),
    })?;

    let mut guard = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    let tx = guard.transaction().map_err(StoreError::Transaction)?;

    let sql = format!(
      "INSERT INTO {} ({}, type, ts, data) VALUES (?1, ?2, ?3, ?4)",
      def.name, def.key
    );
    tx.execute(&sql, params![record.id(), record.kind(), record.ts(), data])
      .map_err(|e| insert_error(e, def.name, record.id()))?;

    tx.commit().map_err(StoreError::Transaction)?;

    debug!(collection = def.name, id = record.id(), "record inserted");
    Ok(record.clone())
  }

  /// Walk the named index in the given direction, decoding records lazily.
  ///
  /// Ties on the indexed value are returned in insertion order, which keeps
  /// result order stable for records sharing a timestamp.
  pub fn query_index<T: Record>(
    &self,
    collection: &str,
    index: &str,
    opts: QueryOptions<'_, T>,
  ) -> Result<Vec<T>, StoreError> {
    let def = self.collection(collection)?;
    let idx = def.index(index).ok_or_else(|| StoreError::UnknownIndex {
      collection: collection.to_string(),
      index: index.to_string(),
    })?;

    let order = match opts.direction {
      Direction::Ascending => "ASC",
      Direction::Descending => "DESC",
    };
    let sql = format!(
      "SELECT data FROM {} ORDER BY {} {}, rowid ASC",
      def.name, idx.column, order
    );

    let guard = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    let mut stmt = guard.prepare(&sql)?;
    let mut rows = stmt.query([])?;

    let mut results = Vec::new();
    while let Some(row) = rows.next()? {
      let data: Vec<u8> = row.get(0)?;
      let record: T = serde_json::from_slice(&data).map_err(|e| StoreError::Corrupt {
        collection: collection.to_string(),
        source: e,
      })?;

      if let Some(stop) = opts.stop_when {
        if stop(&record) {
          break;
        }
      }
      if opts.filter.map_or(true, |keep| keep(&record)) {
        results.push(record);
      }
      if opts.limit > 0 && results.len() >= opts.limit {
        break;
      }
    }

    debug!(
      collection = def.name,
      index,
      count = results.len(),
      "index scan"
    );
    Ok(results)
  }

  /// Test hook for seeding rows the public API would refuse to write.
  #[cfg(test)]
  pub fn execute_raw(&self, sql: &str) -> Result<(), StoreError> {
    let guard = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    guard.execute_batch(sql)?;
    Ok(())
  }
}

fn insert_error(e: rusqlite::Error, collection: &str, key: &str) -> StoreError {
  match &e {
    rusqlite::Error::SqliteFailure(err, _)
      if err.code == rusqlite::ErrorCode::ConstraintViolation =>
    {
      StoreError::DuplicateKey {
        collection: collection.to_string(),
        key: key.to_string(),
      }
    }
    _ => StoreError::Transaction(e),
  }
}

/// Create missing collections and indexes, then record the new version.
///
/// Runs inside an exclusive transaction so a concurrent open sees either the
/// old schema or the new one. Strictly additive: existing tables and indexes
/// are left untouched.
fn migrate(
  conn: &mut Connection,
  schema: &'static [CollectionDef],
  version: i32,
) -> Result<(), StoreError> {
  let tx = conn
    .transaction_with_behavior(TransactionBehavior::Exclusive)
    .map_err(StoreError::Transaction)?;

  let stored: i32 = tx.query_row("PRAGMA user_version", [], |row| row.get(0))?;
  if stored < version {
    for def in schema {
      tx.execute_batch(&def.create_table_sql())?;
      for idx in def.indexes {
        tx.execute_batch(&idx.create_index_sql(def.name))?;
      }
    }
    tx.execute_batch(&format!("PRAGMA user_version = {version}"))?;
    debug!(from = stored, to = version, "schema migrated");
  }

  tx.commit().map_err(StoreError::Transaction)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::schema::{CollectionDef, IndexDef, INDEX_BY_TS, INDEX_BY_TYPE};
  use super::*;
  use crate::records::{Measurement, KIND_WEIGHT};

  const ENTRIES_V1: &[CollectionDef] = &[CollectionDef {
    name: "entries",
    key: "id",
    indexes: &[IndexDef {
      name: INDEX_BY_TS,
      column: "ts",
    }],
  }];

  const ENTRIES_V2: &[CollectionDef] = &[CollectionDef {
    name: "entries",
    key: "id",
    indexes: &[
      IndexDef {
        name: INDEX_BY_TS,
        column: "ts",
      },
      IndexDef {
        name: INDEX_BY_TYPE,
        column: "type",
      },
    ],
  }];

  fn temp_store(dir: &tempfile::TempDir) -> Store {
    Store::open_with(&dir.path().join("test.db"), ENTRIES_V2, 2).unwrap()
  }

  fn bp(sys: f64, ts: i64) -> Measurement {
    Measurement::blood_pressure(sys, 80.0, Some(ts), "", "").unwrap()
  }

  fn weight(kg: f64, ts: i64) -> Measurement {
    Measurement::weight(kg, Some(ts), "").unwrap()
  }

  #[test]
  fn add_then_query_returns_descending_by_ts() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);

    store.add("entries", &bp(120.0, 1_000)).unwrap();
    store.add("entries", &bp(130.0, 3_000)).unwrap();
    store.add("entries", &bp(125.0, 2_000)).unwrap();

    let all: Vec<Measurement> = store
      .query_index("entries", INDEX_BY_TS, QueryOptions::default())
      .unwrap();
    let ts: Vec<i64> = all.iter().map(|m| m.ts).collect();
    assert_eq!(ts, vec![3_000, 2_000, 1_000]);
  }

  #[test]
  fn equal_timestamps_keep_insertion_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);

    let first = bp(110.0, 5_000);
    let second = bp(115.0, 5_000);
    store.add("entries", &first).unwrap();
    store.add("entries", &second).unwrap();

    let all: Vec<Measurement> = store
      .query_index("entries", INDEX_BY_TS, QueryOptions::default())
      .unwrap();
    assert_eq!(all[0].id, first.id);
    assert_eq!(all[1].id, second.id);
  }

  #[test]
  fn duplicate_key_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);

    let entry = bp(120.0, 1_000);
    store.add("entries", &entry).unwrap();

    let err = store.add("entries", &entry).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateKey { .. }), "{err:?}");

    // The failed insert must not have clobbered the committed record.
    let all: Vec<Measurement> = store
      .query_index("entries", INDEX_BY_TS, QueryOptions::default())
      .unwrap();
    assert_eq!(all.len(), 1);
  }

  #[test]
  fn limit_filter_and_stop_when_bound_the_walk() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);

    for i in 1..=6 {
      let entry = if i % 2 == 0 {
        weight(80.0 + i as f64, i * 1_000)
      } else {
        bp(120.0, i * 1_000)
      };
      store.add("entries", &entry).unwrap();
    }

    let keep = |m: &Measurement| m.kind() == KIND_WEIGHT;
    let weights: Vec<Measurement> = store
      .query_index(
        "entries",
        INDEX_BY_TS,
        QueryOptions {
          limit: 2,
          filter: Some(&keep),
          ..QueryOptions::default()
        },
      )
      .unwrap();
    assert_eq!(weights.len(), 2);
    assert_eq!(weights[0].ts, 6_000);
    assert_eq!(weights[1].ts, 4_000);

    // Descending walk ends as soon as ts drops below the cutoff.
    let stop = |m: &Measurement| m.ts < 4_000;
    let recent: Vec<Measurement> = store
      .query_index(
        "entries",
        INDEX_BY_TS,
        QueryOptions {
          stop_when: Some(&stop),
          ..QueryOptions::default()
        },
      )
      .unwrap();
    let ts: Vec<i64> = recent.iter().map(|m| m.ts).collect();
    assert_eq!(ts, vec![6_000, 5_000, 4_000]);
  }

  #[test]
  fn unknown_collection_and_index_are_errors() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);

    let err = store.add("nope", &bp(120.0, 1_000)).unwrap_err();
    assert!(matches!(err, StoreError::UnknownCollection(_)));

    let err = store
      .query_index::<Measurement>("entries", "by_nothing", QueryOptions::default())
      .unwrap_err();
    assert!(matches!(err, StoreError::UnknownIndex { .. }));
  }

  #[test]
  fn invalid_entry_never_reaches_the_collection() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);

    let mut entry = bp(120.0, 1_000);
    if let crate::records::MeasurementPayload::BloodPressure { value, .. } = &mut entry.payload {
      *value = 9_000.0;
    }
    let err = store.add("entries", &entry).unwrap_err();
    assert!(matches!(err, StoreError::InvalidEntry { .. }));

    let all: Vec<Measurement> = store
      .query_index("entries", INDEX_BY_TS, QueryOptions::default())
      .unwrap();
    assert!(all.is_empty());
  }

  #[test]
  fn cloned_handles_observe_the_same_data() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    let other = store.clone();

    store.add("entries", &bp(120.0, 1_000)).unwrap();

    let seen: Vec<Measurement> = other
      .query_index("entries", INDEX_BY_TS, QueryOptions::default())
      .unwrap();
    assert_eq!(seen.len(), 1);
  }

  #[test]
  fn version_bump_adds_index_without_touching_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("migrate.db");

    let before = {
      let store = Store::open_with(&path, ENTRIES_V1, 1).unwrap();
      let entry = store.add("entries", &weight(81.5, 1_000)).unwrap();
      // v1 has no by_type index yet.
      assert!(store
        .query_index::<Measurement>("entries", INDEX_BY_TYPE, QueryOptions::default())
        .is_err());
      entry
    };

    let store = Store::open_with(&path, ENTRIES_V2, 2).unwrap();
    store.add("entries", &weight(82.0, 2_000)).unwrap();

    // Existing record survived the migration untouched.
    let by_ts: Vec<Measurement> = store
      .query_index("entries", INDEX_BY_TS, QueryOptions::default())
      .unwrap();
    assert_eq!(by_ts.len(), 2);
    assert_eq!(by_ts[1], before);

    // The new index serves rows inserted before and after the bump.
    let by_type: Vec<Measurement> = store
      .query_index("entries", INDEX_BY_TYPE, QueryOptions::default())
      .unwrap();
    assert_eq!(by_type.len(), 2);
  }

  #[test]
  fn reopening_at_same_version_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reopen.db");

    {
      let store = Store::open_with(&path, ENTRIES_V2, 2).unwrap();
      store.add("entries", &bp(120.0, 1_000)).unwrap();
    }

    let store = Store::open_with(&path, ENTRIES_V2, 2).unwrap();
    let all: Vec<Measurement> = store
      .query_index("entries", INDEX_BY_TS, QueryOptions::default())
      .unwrap();
    assert_eq!(all.len(), 1);
  }
}
