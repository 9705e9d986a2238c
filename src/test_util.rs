//! Shared fixtures for unit tests.

use crate::db::Store;

/// Open a store on the full application schema in a temp directory.
/// The directory guard must be kept alive for the store's lifetime.
pub fn open_test_store() -> (tempfile::TempDir, Store) {
  let dir = tempfile::tempdir().unwrap();
  let store = Store::open(&dir.path().join("health.db")).unwrap();
  (dir, store)
}
