mod assets;
mod cache;
mod config;
mod dashboard;
mod db;
mod records;
mod repo;
#[cfg(test)]
mod test_util;

use chrono::{Local, NaiveDate, NaiveTime, TimeZone};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use assets::{AssetRequest, AssetStore, HttpFetcher, RequestMode, ShellCache, ASSETS_DB_FILE};
use cache::{AppCache, DEFAULT_LIST_LIMIT};
use dashboard::Aggregator;
use db::schema::DB_FILE;
use db::Store;
use records::{Meal, MealFields, Measurement, KIND_BP, KIND_MEAL, KIND_WEIGHT};
use repo::{MealsRepo, MeasurementsRepo};

#[derive(Parser, Debug)]
#[command(name = "healthlog")]
#[command(about = "An offline-first personal health log")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/healthlog/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Record a blood-pressure measurement
  AddBp {
    /// Systolic pressure, mmHg
    #[arg(long)]
    sys: f64,
    /// Diastolic pressure, mmHg
    #[arg(long)]
    dia: f64,
    /// Date of the measurement, YYYY-MM-DD (default: today)
    #[arg(long)]
    date: Option<String>,
    /// Time of the measurement, HH:MM (default: now)
    #[arg(long)]
    time: Option<String>,
    #[arg(long, default_value = "")]
    note: String,
    /// Where the reading was taken (e.g. "left arm")
    #[arg(long, default_value = "")]
    location: String,
  },
  /// Record a weight measurement
  AddWeight {
    /// Weight in kilograms
    #[arg(long)]
    kg: f64,
    #[arg(long)]
    date: Option<String>,
    #[arg(long)]
    time: Option<String>,
    #[arg(long, default_value = "")]
    note: String,
  },
  /// Record a meal
  AddMeal {
    #[arg(long)]
    calories: u32,
    #[arg(long, default_value = "")]
    description: String,
    /// Protein in grams
    #[arg(long, default_value_t = 0.0)]
    protein: f64,
    /// Carbohydrates in grams
    #[arg(long, default_value_t = 0.0)]
    carbs: f64,
    /// Fats in grams
    #[arg(long, default_value_t = 0.0)]
    fats: f64,
    /// Attach a photo of the meal
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long)]
    date: Option<String>,
    #[arg(long)]
    time: Option<String>,
    #[arg(long, default_value = "")]
    note: String,
  },
  /// List the latest entries of a kind (bp, weight or meal)
  List {
    kind: String,
    #[arg(short, long, default_value_t = DEFAULT_LIST_LIMIT)]
    limit: usize,
  },
  /// Show today's dashboard summary
  Dashboard,
  /// Manage the offline app-shell cache
  Shell {
    #[command(subcommand)]
    command: ShellCommand,
  },
}

#[derive(Subcommand, Debug)]
enum ShellCommand {
  /// Pre-fetch the app-shell manifest into the current cache
  Install,
  /// Evict caches left over from previous shell versions
  Activate,
  /// Serve a URL through the offline cache policies
  Fetch {
    url: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;

  match args.command {
    Command::AddBp {
      sys,
      dia,
      date,
      time,
      note,
      location,
    } => {
      let ts = parse_timestamp(date.as_deref(), time.as_deref())?;
      let entry = Measurement::blood_pressure(sys, dia, ts, &note, &location)?;
      let stored = open_cache(&config)?.add_bp(&entry)?;
      print_json(&stored)
    }
    Command::AddWeight {
      kg,
      date,
      time,
      note,
    } => {
      let ts = parse_timestamp(date.as_deref(), time.as_deref())?;
      let entry = Measurement::weight(kg, ts, &note)?;
      let stored = open_cache(&config)?.add_weight(&entry)?;
      print_json(&stored)
    }
    Command::AddMeal {
      calories,
      description,
      protein,
      carbs,
      fats,
      image,
      date,
      time,
      note,
    } => {
      let ts = parse_timestamp(date.as_deref(), time.as_deref())?;
      let image = image
        .map(|path| {
          std::fs::read(&path).map_err(|e| eyre!("Failed to read image {}: {}", path.display(), e))
        })
        .transpose()?;
      let entry = Meal::new(MealFields {
        calories,
        description: &description,
        protein,
        carbs,
        fats,
        image,
        ts,
        note: &note,
      })?;
      let stored = open_cache(&config)?.add_meal(&entry)?;
      print_json(&stored)
    }
    Command::List { kind, limit } => {
      let cache = open_cache(&config)?;
      match kind.as_str() {
        KIND_BP => {
          let list = cache.bp_list_for_display(limit);
          if let Some(e) = list.error {
            warn!(error = %e, "served from an empty list after a read failure");
          }
          print_json(&list.items)
        }
        KIND_WEIGHT => {
          let list = cache.weight_list_for_display(limit);
          if let Some(e) = list.error {
            warn!(error = %e, "served from an empty list after a read failure");
          }
          print_json(&list.items)
        }
        KIND_MEAL => {
          let list = cache.meal_list_for_display(limit);
          if let Some(e) = list.error {
            warn!(error = %e, "served from an empty list after a read failure");
          }
          print_json(&list.items)
        }
        other => Err(eyre!(
          "Unknown entry kind '{}'. Expected bp, weight or meal.",
          other
        )),
      }
    }
    Command::Dashboard => {
      let display = open_cache(&config)?.today_summary_for_display();
      if let Some(e) = display.error {
        warn!(error = %e, "dashboard summary unavailable");
      }
      print_json(&display.summary)
    }
    Command::Shell { command } => run_shell(&config, command).await,
  }
}

fn open_cache(config: &config::Config) -> Result<AppCache> {
  let data_dir = config.data_dir()?;
  std::fs::create_dir_all(&data_dir)
    .map_err(|e| eyre!("Failed to create data directory {}: {}", data_dir.display(), e))?;
  let store = Store::open(&data_dir.join(DB_FILE))?;
  let measurements = MeasurementsRepo::new(store.clone());
  let meals = MealsRepo::new(store);
  let dashboard = Aggregator::new(
    measurements.clone(),
    meals.clone(),
    config.calories_target,
    config.ttl(),
  );
  Ok(AppCache::new(measurements, meals, dashboard, config.ttl()))
}

async fn run_shell(config: &config::Config, command: ShellCommand) -> Result<()> {
  let data_dir = config.data_dir()?;
  let store = AssetStore::open(&data_dir.join(ASSETS_DB_FILE))?;
  let shell = ShellCache::new(
    store,
    HttpFetcher::new(),
    config.shell_base()?,
    config.shell.manifest.clone(),
  );

  match command {
    ShellCommand::Install => {
      let report = shell.install().await;
      println!(
        "cached {}/{} shell assets ({} failed)",
        report.cached, report.requested, report.failed
      );
      Ok(())
    }
    ShellCommand::Activate => {
      let dropped = shell.activate()?;
      println!("evicted {} assets from old caches", dropped);
      Ok(())
    }
    ShellCommand::Fetch { url, navigate } => {
      let req = AssetRequest {
        url: url::Url::parse(&url).map_err(|e| eyre!("Invalid URL {}: {}", url, e))?,
        mode: if navigate {
          RequestMode::Navigate
        } else {
          RequestMode::Resource
        },
      };
      let served = shell.serve(&req).await;
      eprintln!(
        "{} {} (from {:?})",
        served.status, served.content_type, served.source
      );
      std::io::stdout().write_all(&served.body)?;
      Ok(())
    }
  }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

/// Combine optional date and time into an epoch-millisecond timestamp.
/// Both absent means "now"; a date without a time means midnight local.
fn parse_timestamp(date: Option<&str>, time: Option<&str>) -> Result<Option<i64>> {
  if date.is_none() && time.is_none() {
    return Ok(None);
  }

  let date = match date {
    Some(d) => NaiveDate::parse_from_str(d, "%Y-%m-%d")
      .map_err(|e| eyre!("Invalid date '{}': {}", d, e))?,
    None => Local::now().date_naive(),
  };
  let time = match time {
    Some(t) => {
      NaiveTime::parse_from_str(t, "%H:%M").map_err(|e| eyre!("Invalid time '{}': {}", t, e))?
    }
    None => NaiveTime::MIN,
  };

  let local = Local
    .from_local_datetime(&date.and_time(time))
    .single()
    .ok_or_else(|| eyre!("Ambiguous local time {} {}", date, time))?;
  Ok(Some(local.timestamp_millis()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timestamp_defaults_to_now_when_unset() {
    assert_eq!(parse_timestamp(None, None).unwrap(), None);
  }

  #[test]
  fn date_without_time_is_local_midnight() {
    let ts = parse_timestamp(Some("2026-03-10"), None).unwrap().unwrap();
    let back = Local.timestamp_millis_opt(ts).single().unwrap();
    assert_eq!(back.date_naive().to_string(), "2026-03-10");
    assert_eq!(back.time(), NaiveTime::MIN);
  }

  #[test]
  fn bad_date_is_rejected() {
    assert!(parse_timestamp(Some("10/03/2026"), None).is_err());
  }
}
