//! Repository for blood-pressure and weight measurements.

use crate::db::{schema, QueryOptions, Record, Store, StoreError};
use crate::records::Measurement;

#[derive(Clone)]
pub struct MeasurementsRepo {
  store: Store,
}

impl MeasurementsRepo {
  pub fn new(store: Store) -> Self {
    Self { store }
  }

  /// Persist a pre-validated measurement.
  pub fn add(&self, entry: &Measurement) -> Result<Measurement, StoreError> {
    self.store.add(schema::MEASUREMENTS, entry)
  }

  /// The most recent `limit` measurements of the given kind, newest first.
  pub fn latest_by_type(&self, kind: &str, limit: usize) -> Result<Vec<Measurement>, StoreError> {
    let keep = |m: &Measurement| m.kind() == kind;
    self.store.query_index(
      schema::MEASUREMENTS,
      schema::INDEX_BY_TS,
      QueryOptions {
        limit,
        filter: Some(&keep),
        ..QueryOptions::default()
      },
    )
  }
}
