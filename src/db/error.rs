//! Error taxonomy for the structured store.

use thiserror::Error;

/// Errors surfaced by the store and the repositories built on it.
///
/// These propagate to callers unmodified; only the display-safe wrappers in
/// the application cache convert them into a renderable empty result.
#[derive(Debug, Error)]
pub enum StoreError {
  /// Primary-key collision on insert.
  #[error("duplicate key '{key}' in collection '{collection}'")]
  DuplicateKey { collection: String, key: String },

  /// The underlying transaction aborted. Not retried: the local storage
  /// engine is expected to be reliable, so this is surfaced as-is.
  #[error("store transaction failed: {0}")]
  Transaction(#[source] rusqlite::Error),

  /// A malformed record reached the store layer. This is a contract
  /// violation by the caller, fatal to the operation.
  #[error("invalid {kind} entry: {reason}")]
  InvalidEntry { kind: &'static str, reason: String },

  /// A persisted record could not be decoded back into its entry type.
  #[error("corrupt record in collection '{collection}': {source}")]
  Corrupt {
    collection: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("unknown collection '{0}'")]
  UnknownCollection(String),

  #[error("unknown index '{index}' on collection '{collection}'")]
  UnknownIndex { collection: String, index: String },

  #[error("store lock poisoned")]
  LockPoisoned,

  #[error("could not create store directory: {0}")]
  Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
  fn from(e: rusqlite::Error) -> Self {
    StoreError::Transaction(e)
  }
}
