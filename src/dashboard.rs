//! Dashboard aggregator: composes repository reads into one summary of the
//! current day, with its own small cache underneath the application cache.

use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::db::StoreError;
use crate::records::{Measurement, KIND_BP, KIND_MEAL, KIND_WEIGHT};
use crate::repo::{MealsRepo, MeasurementsRepo};

/// How many recent meals to pull when summing today's calories. A bounded
/// scan filtered by local date, not an index range query: the day boundary
/// depends on the local timezone, which the `by_ts` index knows nothing
/// about.
pub const MEALS_TODAY_FETCH_LIMIT: usize = 100;

/// Derived summary shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TodaySummary {
  pub date: NaiveDate,
  pub calories_eaten: u32,
  pub calories_target: u32,
  pub last_weight: Option<Measurement>,
  pub last_bp: Option<Measurement>,
}

/// Composes the latest weight, latest blood pressure and today's calories.
///
/// The inner cache slot amortizes repeated aggregation; the application
/// cache above it amortizes repeated calls from multiple views. Both levels
/// are cleared explicitly by the write path, so the slot is emptied rather
/// than aged out and its TTL clock restarts at the next populate.
#[derive(Clone)]
pub struct Aggregator {
  measurements: MeasurementsRepo,
  meals: MealsRepo,
  calories_target: u32,
  ttl: Duration,
  summary: Arc<Mutex<Option<(TodaySummary, DateTime<Utc>)>>>,
}

impl Aggregator {
  pub fn new(
    measurements: MeasurementsRepo,
    meals: MealsRepo,
    calories_target: u32,
    ttl: Duration,
  ) -> Self {
    Self {
      measurements,
      meals,
      calories_target,
      ttl,
      summary: Arc::new(Mutex::new(None)),
    }
  }

  /// Today's summary, served from the inner slot when fresh.
  pub fn today_summary(&self) -> Result<TodaySummary, StoreError> {
    {
      let guard = self.summary.lock().map_err(|_| StoreError::LockPoisoned)?;
      if let Some((summary, captured_at)) = guard.as_ref() {
        if Utc::now() - *captured_at < self.ttl {
          debug!("dashboard summary served from inner cache");
          return Ok(summary.clone());
        }
      }
    }

    let summary = self.compute()?;
    let mut guard = self.summary.lock().map_err(|_| StoreError::LockPoisoned)?;
    *guard = Some((summary.clone(), Utc::now()));
    Ok(summary)
  }

  /// Drop the cached summary. Called by the application cache whenever any
  /// measurement or meal is written.
  pub fn invalidate(&self) {
    if let Ok(mut guard) = self.summary.lock() {
      *guard = None;
    }
  }

  fn compute(&self) -> Result<TodaySummary, StoreError> {
    let last_weight = self
      .measurements
      .latest_by_type(KIND_WEIGHT, 1)?
      .into_iter()
      .next();
    let last_bp = self
      .measurements
      .latest_by_type(KIND_BP, 1)?
      .into_iter()
      .next();

    let today = Local::now().date_naive();
    let meals = self.meals.latest_by_type(KIND_MEAL, MEALS_TODAY_FETCH_LIMIT)?;
    let calories_eaten = meals
      .iter()
      .filter(|m| local_date(m.ts) == Some(today))
      .map(|m| m.calories)
      .sum();

    Ok(TodaySummary {
      date: today,
      calories_eaten,
      calories_target: self.calories_target,
      last_weight,
      last_bp,
    })
  }
}

/// Local calendar date of an epoch-millisecond timestamp.
fn local_date(ts: i64) -> Option<NaiveDate> {
  Local.timestamp_millis_opt(ts).single().map(|t| t.date_naive())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::records::{Meal, MealFields};
  use crate::test_util::open_test_store;

  fn aggregator(ttl_secs: i64) -> (tempfile::TempDir, Aggregator, MeasurementsRepo, MealsRepo) {
    let (dir, store) = open_test_store();
    let measurements = MeasurementsRepo::new(store.clone());
    let meals = MealsRepo::new(store);
    let agg = Aggregator::new(
      measurements.clone(),
      meals.clone(),
      2_000,
      Duration::seconds(ttl_secs),
    );
    (dir, agg, measurements, meals)
  }

  fn meal_at(calories: u32, ts: i64) -> Meal {
    Meal::new(MealFields {
      calories,
      ts: Some(ts),
      ..MealFields::default()
    })
    .unwrap()
  }

  #[test]
  fn sums_only_todays_calories() {
    let (_dir, agg, measurements, meals) = aggregator(30);

    let now = crate::records::now_ms();
    meals.add(&meal_at(400, now)).unwrap();
    meals.add(&meal_at(300, now - 1_000)).unwrap();
    // Two days ago, never part of today's total.
    meals.add(&meal_at(900, now - 2 * 24 * 3_600 * 1_000)).unwrap();

    measurements
      .add(&Measurement::weight(81.0, Some(now - 1_000), "").unwrap())
      .unwrap();
    measurements
      .add(&Measurement::blood_pressure(120.0, 80.0, Some(now), "", "").unwrap())
      .unwrap();

    let summary = agg.today_summary().unwrap();
    assert_eq!(summary.calories_eaten, 700);
    assert_eq!(summary.calories_target, 2_000);
    assert_eq!(summary.last_weight.as_ref().map(|m| m.ts), Some(now - 1_000));
    assert_eq!(summary.last_bp.as_ref().map(|m| m.ts), Some(now));
  }

  #[test]
  fn empty_log_yields_empty_summary() {
    let (_dir, agg, _, _) = aggregator(30);

    let summary = agg.today_summary().unwrap();
    assert_eq!(summary.calories_eaten, 0);
    assert!(summary.last_weight.is_none());
    assert!(summary.last_bp.is_none());
  }

  #[test]
  fn fresh_slot_is_served_until_invalidated() {
    let (_dir, agg, _, meals) = aggregator(3_600);

    let now = crate::records::now_ms();
    meals.add(&meal_at(400, now)).unwrap();
    assert_eq!(agg.today_summary().unwrap().calories_eaten, 400);

    // A write that bypasses the invalidation hook is not yet visible...
    meals.add(&meal_at(200, now)).unwrap();
    assert_eq!(agg.today_summary().unwrap().calories_eaten, 400);

    // ...until the slot is explicitly cleared.
    agg.invalidate();
    assert_eq!(agg.today_summary().unwrap().calories_eaten, 600);
  }

  #[test]
  fn expired_slot_is_recomputed() {
    let (_dir, agg, _, meals) = aggregator(3_600);

    let now = crate::records::now_ms();
    meals.add(&meal_at(400, now)).unwrap();
    assert_eq!(agg.today_summary().unwrap().calories_eaten, 400);

    meals.add(&meal_at(200, now)).unwrap();

    // Age the slot past the TTL by hand.
    {
      let mut guard = agg.summary.lock().unwrap();
      if let Some((_, captured_at)) = guard.as_mut() {
        *captured_at = Utc::now() - Duration::seconds(3_601);
      }
    }
    assert_eq!(agg.today_summary().unwrap().calories_eaten, 600);
  }
}
