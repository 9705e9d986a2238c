//! Health-log entry types: a shared id/timestamp/note envelope plus a
//! type-tagged payload per entry kind.
//!
//! Constructors generate the id, default the timestamp to "now" and run the
//! same bounds checks the store re-asserts on insert, so an entry that exists
//! is always well-formed.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::{Record, StoreError};

pub const KIND_BP: &str = "bp";
pub const KIND_WEIGHT: &str = "weight";
pub const KIND_MEAL: &str = "meal";

pub const BP_SYS_MIN: f64 = 60.0;
pub const BP_SYS_MAX: f64 = 250.0;
pub const BP_DIA_MIN: f64 = 30.0;
pub const BP_DIA_MAX: f64 = 150.0;

pub const WEIGHT_MIN_KG: f64 = 1.0;
pub const WEIGHT_MAX_KG: f64 = 500.0;

pub const CALORIES_MIN: u32 = 1;
pub const CALORIES_MAX: u32 = 99_999;

pub const CALORIES_TARGET_DEFAULT: u32 = 2000;

pub const MAX_NOTE_LENGTH: usize = 500;
pub const MAX_DESCRIPTION_LENGTH: usize = 500;
pub const MAX_LOCATION_LENGTH: usize = 200;

/// Current time as an epoch-millisecond timestamp.
pub fn now_ms() -> i64 {
  Utc::now().timestamp_millis()
}

fn new_id() -> String {
  uuid::Uuid::new_v4().to_string()
}

/// A blood-pressure or weight measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
  pub id: String,
  /// Epoch milliseconds.
  pub ts: i64,
  #[serde(default)]
  pub note: String,
  #[serde(flatten)]
  pub payload: MeasurementPayload,
}

/// Type-specific payload of a measurement, tagged as `"bp"` or `"weight"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MeasurementPayload {
  #[serde(rename = "bp")]
  BloodPressure {
    /// Systolic, mmHg.
    value: f64,
    /// Diastolic, mmHg.
    value2: f64,
    #[serde(default)]
    location: String,
  },
  #[serde(rename = "weight")]
  Weight {
    /// Kilograms.
    value: f64,
  },
}

impl Measurement {
  /// Build a blood-pressure entry. `ts = None` means "now".
  pub fn blood_pressure(
    sys: f64,
    dia: f64,
    ts: Option<i64>,
    note: &str,
    location: &str,
  ) -> Result<Self, StoreError> {
    let entry = Self {
      id: new_id(),
      ts: ts.unwrap_or_else(now_ms),
      note: note.trim().to_string(),
      payload: MeasurementPayload::BloodPressure {
        value: sys,
        value2: dia,
        location: location.trim().to_string(),
      },
    };
    entry.verify()?;
    Ok(entry)
  }

  /// Build a weight entry. `ts = None` means "now".
  pub fn weight(kg: f64, ts: Option<i64>, note: &str) -> Result<Self, StoreError> {
    let entry = Self {
      id: new_id(),
      ts: ts.unwrap_or_else(now_ms),
      note: note.trim().to_string(),
      payload: MeasurementPayload::Weight { value: kg },
    };
    entry.verify()?;
    Ok(entry)
  }
}

impl Record for Measurement {
  fn id(&self) -> &str {
    &self.id
  }

  fn kind(&self) -> &'static str {
    match self.payload {
      MeasurementPayload::BloodPressure { .. } => KIND_BP,
      MeasurementPayload::Weight { .. } => KIND_WEIGHT,
    }
  }

  fn ts(&self) -> i64 {
    self.ts
  }

  fn verify(&self) -> Result<(), StoreError> {
    let kind = self.kind();
    check_envelope(kind, self.ts, &self.note)?;
    match &self.payload {
      MeasurementPayload::BloodPressure {
        value,
        value2,
        location,
      } => {
        check_range(kind, "systolic", *value, BP_SYS_MIN, BP_SYS_MAX)?;
        check_range(kind, "diastolic", *value2, BP_DIA_MIN, BP_DIA_MAX)?;
        check_length(kind, "location", location, MAX_LOCATION_LENGTH)?;
      }
      MeasurementPayload::Weight { value } => {
        check_range(kind, "weight", *value, WEIGHT_MIN_KG, WEIGHT_MAX_KG)?;
      }
    }
    Ok(())
  }
}

/// A logged meal. The image, when present, is an opaque binary blob the
/// store keeps uninterpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
  pub id: String,
  /// Epoch milliseconds.
  pub ts: i64,
  pub calories: u32,
  #[serde(default)]
  pub description: String,
  /// Grams.
  #[serde(default)]
  pub protein: f64,
  /// Grams.
  #[serde(default)]
  pub carbs: f64,
  /// Grams.
  #[serde(default)]
  pub fats: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image: Option<Vec<u8>>,
  #[serde(default)]
  pub note: String,
}

/// Input fields for a new meal entry.
#[derive(Debug, Default)]
pub struct MealFields<'a> {
  pub calories: u32,
  pub description: &'a str,
  pub protein: f64,
  pub carbs: f64,
  pub fats: f64,
  pub image: Option<Vec<u8>>,
  /// `None` means "now".
  pub ts: Option<i64>,
  pub note: &'a str,
}

impl Meal {
  pub fn new(fields: MealFields<'_>) -> Result<Self, StoreError> {
    let entry = Self {
      id: new_id(),
      ts: fields.ts.unwrap_or_else(now_ms),
      calories: fields.calories,
      description: fields.description.trim().to_string(),
      protein: fields.protein,
      carbs: fields.carbs,
      fats: fields.fats,
      image: fields.image,
      note: fields.note.trim().to_string(),
    };
    entry.verify()?;
    Ok(entry)
  }
}

impl Record for Meal {
  fn id(&self) -> &str {
    &self.id
  }

  fn kind(&self) -> &'static str {
    KIND_MEAL
  }

  fn ts(&self) -> i64 {
    self.ts
  }

  fn verify(&self) -> Result<(), StoreError> {
    check_envelope(KIND_MEAL, self.ts, &self.note)?;
    if self.calories < CALORIES_MIN || self.calories > CALORIES_MAX {
      return Err(invalid(
        KIND_MEAL,
        format!(
          "calories {} outside [{CALORIES_MIN}, {CALORIES_MAX}]",
          self.calories
        ),
      ));
    }
    check_grams(KIND_MEAL, "protein", self.protein)?;
    check_grams(KIND_MEAL, "carbs", self.carbs)?;
    check_grams(KIND_MEAL, "fats", self.fats)?;
    check_length(KIND_MEAL, "description", &self.description, MAX_DESCRIPTION_LENGTH)?;
    Ok(())
  }
}

fn invalid(kind: &'static str, reason: String) -> StoreError {
  StoreError::InvalidEntry { kind, reason }
}

fn check_envelope(kind: &'static str, ts: i64, note: &str) -> Result<(), StoreError> {
  if ts <= 0 {
    return Err(invalid(kind, format!("timestamp {ts} is not positive")));
  }
  check_length(kind, "note", note, MAX_NOTE_LENGTH)
}

fn check_range(
  kind: &'static str,
  field: &str,
  value: f64,
  min: f64,
  max: f64,
) -> Result<(), StoreError> {
  if !value.is_finite() || value < min || value > max {
    return Err(invalid(
      kind,
      format!("{field} {value} outside [{min}, {max}]"),
    ));
  }
  Ok(())
}

fn check_grams(kind: &'static str, field: &str, value: f64) -> Result<(), StoreError> {
  if !value.is_finite() || value < 0.0 {
    return Err(invalid(kind, format!("{field} {value} must be non-negative")));
  }
  Ok(())
}

fn check_length(
  kind: &'static str,
  field: &str,
  value: &str,
  max: usize,
) -> Result<(), StoreError> {
  if value.chars().count() > max {
    return Err(invalid(kind, format!("{field} longer than {max} characters")));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn blood_pressure_roundtrips_with_type_tag() {
    let entry = Measurement::blood_pressure(120.0, 80.0, Some(1_000), "after run", "home").unwrap();

    let json = serde_json::to_value(&entry).unwrap();
    assert_eq!(json["type"], "bp");
    assert_eq!(json["value"], 120.0);
    assert_eq!(json["value2"], 80.0);

    let back: Measurement = serde_json::from_value(json).unwrap();
    assert_eq!(back, entry);
  }

  #[test]
  fn distinct_entries_get_distinct_ids() {
    let a = Measurement::weight(80.0, None, "").unwrap();
    let b = Measurement::weight(80.0, None, "").unwrap();
    assert_ne!(a.id, b.id);
  }

  #[test]
  fn missing_timestamp_defaults_to_now() {
    let before = now_ms();
    let entry = Measurement::weight(80.0, None, "").unwrap();
    assert!(entry.ts >= before && entry.ts <= now_ms());
  }

  #[test]
  fn out_of_range_values_are_rejected() {
    assert!(Measurement::blood_pressure(300.0, 80.0, Some(1), "", "").is_err());
    assert!(Measurement::blood_pressure(120.0, 20.0, Some(1), "", "").is_err());
    assert!(Measurement::weight(0.0, Some(1), "").is_err());
    assert!(Meal::new(MealFields {
      calories: 0,
      ..MealFields::default()
    })
    .is_err());
    assert!(Meal::new(MealFields {
      calories: 500,
      protein: -1.0,
      ..MealFields::default()
    })
    .is_err());
  }

  #[test]
  fn overlong_note_is_rejected() {
    let long = "x".repeat(MAX_NOTE_LENGTH + 1);
    assert!(Measurement::weight(80.0, Some(1), &long).is_err());
  }

  #[test]
  fn meal_keeps_its_image_blob_opaque() {
    let blob = vec![0xffu8, 0xd8, 0xff, 0xe0];
    let meal = Meal::new(MealFields {
      calories: 650,
      description: "lunch",
      image: Some(blob.clone()),
      ts: Some(1_000),
      ..MealFields::default()
    })
    .unwrap();

    let json = serde_json::to_vec(&meal).unwrap();
    let back: Meal = serde_json::from_slice(&json).unwrap();
    assert_eq!(back.image.as_deref(), Some(blob.as_slice()));
  }
}
