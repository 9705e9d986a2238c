//! The contract between entry types and the structured store.

use serde::{de::DeserializeOwned, Serialize};

use super::error::StoreError;

/// Trait for entries that can be persisted in a collection.
///
/// Entries are append-only: once added they are never updated or deleted.
/// The `id`, `kind` and `ts` accessors feed the mirrored index columns.
pub trait Record: Clone + Serialize + DeserializeOwned {
  /// Unique, immutable identifier within the collection.
  fn id(&self) -> &str;

  /// Logical entry type (e.g. "bp", "weight", "meal").
  fn kind(&self) -> &'static str;

  /// Epoch-millisecond timestamp.
  fn ts(&self) -> i64;

  /// Format-consistency assertion run by the store before an insert.
  ///
  /// Entries arrive pre-validated from the input layer; this is the final
  /// check the store relies on, and a failure here means the calling code
  /// broke the contract rather than the user typed something wrong.
  fn verify(&self) -> Result<(), StoreError>;
}
