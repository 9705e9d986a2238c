//! Feature repositories: thin typed accessors binding one collection and one
//! index to domain semantics. No validation happens here — entries arriving
//! at `add` are already shaped and checked.

mod meals;
mod measurements;

pub use meals::MealsRepo;
pub use measurements::MeasurementsRepo;
