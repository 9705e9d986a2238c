//! In-memory, TTL-based read cache over the repositories and the dashboard
//! aggregator.
//!
//! One slot per list kind plus one for the dashboard summary. Reads populate
//! their slot; any write persists through the owning repository and then
//! unconditionally clears the affected list slot and the summary slot (the
//! summary is derived from all three sources, so every write invalidates it
//! at both cache levels). Staleness within the TTL window is accepted: the
//! app is single-user and local, so a burst of navigations is served from
//! cache and a write is always visible to the next read.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::dashboard::{Aggregator, TodaySummary};
use crate::db::{Record, StoreError};
use crate::records::{Meal, Measurement, KIND_BP, KIND_MEAL, KIND_WEIGHT};
use crate::repo::{MealsRepo, MeasurementsRepo};

/// Default number of entries a list read returns.
pub const DEFAULT_LIST_LIMIT: usize = 20;

/// A cached list snapshot. The copy is ephemeral and value-logged: it holds
/// no ownership over the underlying records and carries its own capture time
/// and the limit it was populated for.
struct ListSlot<T> {
  data: Vec<T>,
  captured_at: DateTime<Utc>,
  limit: usize,
}

/// A list result that never fails: storage errors are reported alongside an
/// empty item list so rendering callers always have something to show.
#[derive(Debug)]
pub struct DisplayList<T> {
  pub items: Vec<T>,
  pub error: Option<StoreError>,
}

/// Display-safe counterpart of [`DisplayList`] for the summary read.
#[derive(Debug)]
pub struct DisplaySummary {
  pub summary: Option<TodaySummary>,
  pub error: Option<StoreError>,
}

pub struct AppCache {
  measurements: MeasurementsRepo,
  meals: MealsRepo,
  dashboard: Aggregator,
  ttl: Duration,
  bp: Mutex<Option<ListSlot<Measurement>>>,
  weight: Mutex<Option<ListSlot<Measurement>>>,
  meal: Mutex<Option<ListSlot<Meal>>>,
  summary: Mutex<Option<(TodaySummary, DateTime<Utc>)>>,
}

impl AppCache {
  pub fn new(
    measurements: MeasurementsRepo,
    meals: MealsRepo,
    dashboard: Aggregator,
    ttl: Duration,
  ) -> Self {
    Self {
      measurements,
      meals,
      dashboard,
      ttl,
      bp: Mutex::new(None),
      weight: Mutex::new(None),
      meal: Mutex::new(None),
      summary: Mutex::new(None),
    }
  }

  // ---- reads ----

  pub fn bp_list(&self, limit: usize) -> Result<Vec<Measurement>, StoreError> {
    let repo = &self.measurements;
    serve_list(&self.bp, self.ttl, limit, KIND_BP, || {
      repo.latest_by_type(KIND_BP, limit)
    })
  }

  pub fn weight_list(&self, limit: usize) -> Result<Vec<Measurement>, StoreError> {
    let repo = &self.measurements;
    serve_list(&self.weight, self.ttl, limit, KIND_WEIGHT, || {
      repo.latest_by_type(KIND_WEIGHT, limit)
    })
  }

  pub fn meal_list(&self, limit: usize) -> Result<Vec<Meal>, StoreError> {
    let repo = &self.meals;
    serve_list(&self.meal, self.ttl, limit, KIND_MEAL, || {
      repo.latest_by_type(KIND_MEAL, limit)
    })
  }

  /// Today's summary, from this cache's slot, the aggregator's inner slot,
  /// or a fresh aggregation, in that order.
  pub fn today_summary(&self) -> Result<TodaySummary, StoreError> {
    {
      let guard = self.summary.lock().map_err(|_| StoreError::LockPoisoned)?;
      if let Some((summary, captured_at)) = guard.as_ref() {
        if Utc::now() - *captured_at < self.ttl {
          debug!("summary served from app cache");
          return Ok(summary.clone());
        }
      }
    }

    let summary = self.dashboard.today_summary()?;
    let mut guard = self.summary.lock().map_err(|_| StoreError::LockPoisoned)?;
    *guard = Some((summary.clone(), Utc::now()));
    Ok(summary)
  }

  // ---- display-safe reads ----

  pub fn bp_list_for_display(&self, limit: usize) -> DisplayList<Measurement> {
    display(self.bp_list(limit))
  }

  pub fn weight_list_for_display(&self, limit: usize) -> DisplayList<Measurement> {
    display(self.weight_list(limit))
  }

  pub fn meal_list_for_display(&self, limit: usize) -> DisplayList<Meal> {
    display(self.meal_list(limit))
  }

  pub fn today_summary_for_display(&self) -> DisplaySummary {
    match self.today_summary() {
      Ok(summary) => DisplaySummary {
        summary: Some(summary),
        error: None,
      },
      Err(e) => {
        warn!(error = %e, "summary read failed, rendering empty");
        DisplaySummary {
          summary: None,
          error: Some(e),
        }
      }
    }
  }

  // ---- writes ----

  /// Persist a blood-pressure entry, then clear the bp list slot and the
  /// summary at both cache levels.
  pub fn add_bp(&self, entry: &Measurement) -> Result<Measurement, StoreError> {
    expect_kind(entry, KIND_BP)?;
    let saved = self.measurements.add(entry)?;
    clear(&self.bp);
    self.invalidate_summary();
    Ok(saved)
  }

  /// Persist a weight entry, then clear the weight list slot and the summary
  /// at both cache levels.
  pub fn add_weight(&self, entry: &Measurement) -> Result<Measurement, StoreError> {
    expect_kind(entry, KIND_WEIGHT)?;
    let saved = self.measurements.add(entry)?;
    clear(&self.weight);
    self.invalidate_summary();
    Ok(saved)
  }

  /// Persist a meal entry, then clear the meal list slot and the summary at
  /// both cache levels.
  pub fn add_meal(&self, entry: &Meal) -> Result<Meal, StoreError> {
    let saved = self.meals.add(entry)?;
    clear(&self.meal);
    self.invalidate_summary();
    Ok(saved)
  }

  // ---- invalidation ----

  pub fn invalidate_lists(&self) {
    clear(&self.bp);
    clear(&self.weight);
    clear(&self.meal);
  }

  pub fn invalidate_all(&self) {
    self.invalidate_lists();
    self.invalidate_summary();
  }

  fn invalidate_summary(&self) {
    if let Ok(mut guard) = self.summary.lock() {
      *guard = None;
    }
    self.dashboard.invalidate();
  }
}

/// Serve a list read from its slot, or call through and repopulate.
///
/// A slot populated for a larger limit serves a smaller request by
/// truncation; the reverse is a miss, since the slot would be missing tail
/// entries the caller asked for.
fn serve_list<T, F>(
  slot: &Mutex<Option<ListSlot<T>>>,
  ttl: Duration,
  limit: usize,
  kind: &str,
  fetch: F,
) -> Result<Vec<T>, StoreError>
where
  T: Clone,
  F: FnOnce() -> Result<Vec<T>, StoreError>,
{
  {
    let guard = slot.lock().map_err(|_| StoreError::LockPoisoned)?;
    if let Some(cached) = guard.as_ref() {
      if Utc::now() - cached.captured_at < ttl && cached.limit >= limit {
        debug!(kind, limit, "list served from cache");
        return Ok(cached.data.iter().take(limit).cloned().collect());
      }
    }
  }

  debug!(kind, limit, "list cache miss");
  let data = fetch()?;
  let mut guard = slot.lock().map_err(|_| StoreError::LockPoisoned)?;
  *guard = Some(ListSlot {
    data: data.clone(),
    captured_at: Utc::now(),
    limit,
  });
  Ok(data)
}

fn clear<T>(slot: &Mutex<Option<ListSlot<T>>>) {
  if let Ok(mut guard) = slot.lock() {
    *guard = None;
  }
}

fn display<T>(result: Result<Vec<T>, StoreError>) -> DisplayList<T> {
  match result {
    Ok(items) => DisplayList { items, error: None },
    Err(e) => {
      warn!(error = %e, "list read failed, rendering empty");
      DisplayList {
        items: Vec::new(),
        error: Some(e),
      }
    }
  }
}

fn expect_kind(entry: &Measurement, kind: &'static str) -> Result<(), StoreError> {
  if entry.kind() != kind {
    return Err(StoreError::InvalidEntry {
      kind,
      reason: format!("got a '{}' entry", entry.kind()),
    });
  }
  Ok(())
}
