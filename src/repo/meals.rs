//! Repository for meal entries.

use crate::db::{schema, QueryOptions, Record, Store, StoreError};
use crate::records::Meal;

#[derive(Clone)]
pub struct MealsRepo {
  store: Store,
}

impl MealsRepo {
  pub fn new(store: Store) -> Self {
    Self { store }
  }

  /// Persist a pre-validated meal.
  pub fn add(&self, entry: &Meal) -> Result<Meal, StoreError> {
    self.store.add(schema::MEALS, entry)
  }

  /// The most recent `limit` meals of the given kind, newest first.
  pub fn latest_by_type(&self, kind: &str, limit: usize) -> Result<Vec<Meal>, StoreError> {
    let keep = |m: &Meal| m.kind() == kind;
    self.store.query_index(
      schema::MEALS,
      schema::INDEX_BY_TS,
      QueryOptions {
        limit,
        filter: Some(&keep),
        ..QueryOptions::default()
      },
    )
  }

  /// Meals with `start_ts <= ts <= end_ts`, newest first.
  ///
  /// The walk runs over the descending `by_ts` index, so once a record's
  /// timestamp drops strictly below `start_ts` no later-visited record can
  /// re-enter the window; records at exactly `start_ts` are still included
  /// because the stop condition is strict.
  pub fn by_date_range(&self, start_ts: i64, end_ts: i64) -> Result<Vec<Meal>, StoreError> {
    let in_window = |m: &Meal| m.ts >= start_ts && m.ts <= end_ts;
    let past_window = |m: &Meal| m.ts < start_ts;
    self.store.query_index(
      schema::MEALS,
      schema::INDEX_BY_TS,
      QueryOptions {
        filter: Some(&in_window),
        stop_when: Some(&past_window),
        ..QueryOptions::default()
      },
    )
  }
}
