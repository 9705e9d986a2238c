//! Declarative schema for the structured store.
//!
//! Bump `SCHEMA_VERSION` when adding a collection or an index; the additions
//! are created in existing databases on the next open. Nothing is ever
//! dropped or rewritten by a migration.

/// Database file name inside the data directory.
pub const DB_FILE: &str = "health.db";

/// Current schema version, recorded in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 2;

pub const MEASUREMENTS: &str = "measurements";
pub const MEALS: &str = "meals";
pub const SETTINGS: &str = "settings";

/// Timestamp index, ordered, non-unique. Descending iteration gives
/// most-recent-first.
pub const INDEX_BY_TS: &str = "by_ts";
/// Entry-kind index, non-unique.
pub const INDEX_BY_TYPE: &str = "by_type";

/// A named record collection with a primary key and secondary indexes.
#[derive(Debug, Clone, Copy)]
pub struct CollectionDef {
  pub name: &'static str,
  /// Primary key column.
  pub key: &'static str,
  pub indexes: &'static [IndexDef],
}

/// A secondary index over one mirrored record field.
#[derive(Debug, Clone, Copy)]
pub struct IndexDef {
  pub name: &'static str,
  pub column: &'static str,
}

const TIMESTAMPED_INDEXES: &[IndexDef] = &[
  IndexDef {
    name: INDEX_BY_TS,
    column: "ts",
  },
  IndexDef {
    name: INDEX_BY_TYPE,
    column: "type",
  },
];

pub const SCHEMA: &[CollectionDef] = &[
  CollectionDef {
    name: MEASUREMENTS,
    key: "id",
    indexes: TIMESTAMPED_INDEXES,
  },
  CollectionDef {
    name: MEALS,
    key: "id",
    indexes: TIMESTAMPED_INDEXES,
  },
  CollectionDef {
    name: SETTINGS,
    key: "key",
    indexes: &[],
  },
];

impl CollectionDef {
  /// SQL to create this collection if it does not exist yet.
  ///
  /// Indexed fields are mirrored into columns next to the serialized record
  /// so index scans stay ordered without decoding every row up front.
  pub fn create_table_sql(&self) -> String {
    format!(
      "CREATE TABLE IF NOT EXISTS {name} (\n\
       {key} TEXT PRIMARY KEY,\n\
       type TEXT NOT NULL DEFAULT '',\n\
       ts INTEGER NOT NULL DEFAULT 0,\n\
       data BLOB NOT NULL\n\
       )",
      name = self.name,
      key = self.key,
    )
  }

  pub fn index(&self, name: &str) -> Option<&'static IndexDef> {
    self.indexes.iter().find(|i| i.name == name)
  }
}

impl IndexDef {
  /// SQL to create this index if it does not exist yet. Index names are
  /// prefixed with the collection name because SQLite index names are
  /// database-global.
  pub fn create_index_sql(&self, collection: &str) -> String {
    format!(
      "CREATE INDEX IF NOT EXISTS idx_{collection}_{name} ON {collection}({column})",
      collection = collection,
      name = self.name,
      column = self.column,
    )
  }
}

/// Look up a collection definition by name.
pub fn collection(schema: &'static [CollectionDef], name: &str) -> Option<&'static CollectionDef> {
  schema.iter().find(|c| c.name == name)
}
