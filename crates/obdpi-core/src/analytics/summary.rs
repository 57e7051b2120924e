//! Trip and window summaries
//!
//! Distance integrates speed over the sample interval; fuel is estimated
//! from mass air flow at the stoichiometric ratio. Both use the same Δt
//! for every sample, chosen by [`DtMode`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::aggregate::{rounded, Aggregate};
use super::trip::Trip;
use crate::reading::{iso_seconds, Reading};
use crate::unit_conversion::{
    air_mass_to_fuel_mass, gasoline_mass_to_volume_ml, milliliters_to_gallons_us, round_to,
    STOICH_AFR_GASOLINE,
};

/// Note attached to summaries without any MAF sample
pub const NO_MAF_NOTE: &str = "MAF data not available - fuel consumption could not be estimated";

const SECONDS_PER_HOUR: f64 = 3600.0;

/// How the per-sample Δt is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtMode {
    /// Every sample counts for the nominal interval
    #[default]
    Nominal,
    /// Gap to the previous sample's timestamp; the first sample gets the nominal interval
    Timestamps,
}

/// Summary settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryOptions {
    /// Nominal seconds per sample
    pub sample_interval_secs: f64,
    /// How Δt is chosen per sample
    pub dt_mode: DtMode,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            sample_interval_secs: 1.0,
            dt_mode: DtMode::Nominal,
        }
    }
}

impl SummaryOptions {
    /// Δt in seconds for every reading, in order
    pub fn sample_intervals(&self, readings: &[Reading]) -> Vec<f64> {
        match self.dt_mode {
            DtMode::Nominal => vec![self.sample_interval_secs; readings.len()],
            DtMode::Timestamps => {
                let mut previous: Option<DateTime<Utc>> = None;
                readings
                    .iter()
                    .map(|r| {
                        let dt = previous.map_or(self.sample_interval_secs, |p| {
                            ((r.timestamp - p).num_milliseconds() as f64 / 1000.0).max(0.0)
                        });
                        previous = Some(r.timestamp);
                        dt
                    })
                    .collect()
            }
        }
    }
}

/// Intermediate quantities of the MAF-based fuel estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FuelEstimate {
    /// Air that entered the engine, grams
    pub air_mass_g: f64,
    /// Fuel burned at the stoichiometric ratio, grams
    pub fuel_mass_g: f64,
    /// Fuel volume, milliliters
    pub fuel_volume_ml: f64,
    /// Fuel volume, US gallons
    pub fuel_gallons: f64,
}

impl FuelEstimate {
    /// Estimate from the air mass that entered the engine
    pub fn from_air_mass(air_mass_g: f64) -> Self {
        let fuel_mass_g = air_mass_to_fuel_mass(air_mass_g, STOICH_AFR_GASOLINE);
        let fuel_volume_ml = gasoline_mass_to_volume_ml(fuel_mass_g);
        Self {
            air_mass_g,
            fuel_mass_g,
            fuel_volume_ml,
            fuel_gallons: milliliters_to_gallons_us(fuel_volume_ml),
        }
    }
}

/// `Σ speed_mph · Δt / 3600`; absent speed contributes zero
pub fn integrate_distance(readings: &[Reading], intervals: &[f64]) -> f64 {
    readings
        .iter()
        .zip(intervals)
        .map(|(r, dt)| r.speed_mph.unwrap_or(0.0) * dt / SECONDS_PER_HOUR)
        .sum()
}

/// Fuel estimate, or `None` when no reading carries MAF
pub fn estimate_fuel(readings: &[Reading], intervals: &[f64]) -> Option<FuelEstimate> {
    let mut samples = 0usize;
    let air_mass_g: f64 = readings
        .iter()
        .zip(intervals)
        .filter_map(|(r, dt)| r.maf_gps.map(|maf| maf * dt))
        .inspect(|_| samples += 1)
        .sum();
    (samples > 0).then(|| FuelEstimate::from_air_mass(air_mass_g))
}

/// Trip summary in its wire shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripSummary {
    /// Trip start
    #[serde(with = "iso_seconds")]
    pub trip_start: DateTime<Utc>,
    /// Trip end
    #[serde(with = "iso_seconds")]
    pub trip_end: DateTime<Utc>,
    /// `trip_end - trip_start`
    pub duration_seconds: f64,
    /// Readings inside the bracket
    pub total_samples: usize,
    /// Integrated distance
    pub total_distance_miles: f64,
    /// Mean of the present speeds
    pub average_speed_mph: Option<f64>,
    /// Highest speed
    pub max_speed_mph: Option<f64>,
    /// Highest engine speed
    pub max_rpm: Option<u32>,
    /// Hottest coolant reading
    pub max_coolant_temp_f: Option<f64>,
    /// Mean throttle position
    pub average_throttle_pct: Option<f64>,
    /// MAF-based fuel estimate; absent without MAF samples
    pub fuel_used_gallons: Option<f64>,
    /// Distance over fuel; absent when either is missing or zero
    pub mpg_estimate: Option<f64>,
    /// Why an estimate is missing
    pub note: Option<String>,
}

/// Outcome of a trip summary request
#[derive(Debug, Clone, PartialEq)]
pub enum TripReport {
    /// No trip was ever started
    NoTrip,
    /// The trip has no end yet
    StillActive {
        /// When the trip started
        start: DateTime<Utc>,
    },
    /// No readings inside the trip bracket
    NoData {
        /// Trip start
        start: DateTime<Utc>,
        /// Trip end
        end: DateTime<Utc>,
    },
    /// Full summary
    Complete(TripSummary),
}

/// Summarize `readings` (ordered by timestamp) for `trip`.
///
/// Readings outside the trip bracket are ignored. Display values are
/// rounded after the computation, never before: distance to 4 places,
/// fuel to 6, MPG and averages to 1.
pub fn summarize_trip(trip: Option<&Trip>, readings: &[Reading], options: &SummaryOptions) -> TripReport {
    let Some(trip) = trip else {
        return TripReport::NoTrip;
    };
    let Some(end) = trip.end else {
        return TripReport::StillActive { start: trip.start };
    };

    let readings: Vec<Reading> = readings
        .iter()
        .filter(|r| trip.contains(r.timestamp))
        .cloned()
        .collect();
    if readings.is_empty() {
        return TripReport::NoData {
            start: trip.start,
            end,
        };
    }

    let intervals = options.sample_intervals(&readings);
    let distance = integrate_distance(&readings, &intervals);
    let fuel = estimate_fuel(&readings, &intervals);
    let mpg = fuel
        .filter(|f| f.fuel_gallons > 0.0 && distance > 0.0)
        .map(|f| distance / f.fuel_gallons);

    let speed = Aggregate::of(&readings, |r| r.speed_mph);
    let rpm = Aggregate::of(&readings, |r| r.rpm.map(f64::from));
    let coolant = Aggregate::of(&readings, |r| r.coolant_temp_f);
    let throttle = Aggregate::of(&readings, |r| r.throttle_pct);

    TripReport::Complete(TripSummary {
        trip_start: trip.start,
        trip_end: end,
        duration_seconds: round_to(trip.duration_seconds().unwrap_or(0.0), 1),
        total_samples: readings.len(),
        total_distance_miles: round_to(distance, 4),
        average_speed_mph: rounded(speed.average(), 1),
        max_speed_mph: rounded(speed.max(), 1),
        max_rpm: rpm.max().map(|v| v as u32),
        max_coolant_temp_f: rounded(coolant.max(), 1),
        average_throttle_pct: rounded(throttle.average(), 1),
        fuel_used_gallons: fuel.map(|f| round_to(f.fuel_gallons, 6)),
        mpg_estimate: rounded(mpg, 1),
        note: fuel.is_none().then(|| NO_MAF_NOTE.to_string()),
    })
}

/// Statistics over a window of recent readings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentStats {
    /// Readings in the window
    pub readings_analyzed: usize,
    /// Mean engine speed
    pub average_rpm: Option<f64>,
    /// Mean speed
    pub average_speed_mph: Option<f64>,
    /// Hottest coolant reading
    pub max_coolant_temp_f: Option<f64>,
    /// Coolest coolant reading
    pub min_coolant_temp_f: Option<f64>,
    /// Mean throttle position
    pub average_throttle_pct: Option<f64>,
}

/// Summarize a window of readings; `None` when the window is empty
pub fn summarize_recent(readings: &[Reading]) -> Option<RecentStats> {
    if readings.is_empty() {
        return None;
    }
    let rpm = Aggregate::of(readings, |r| r.rpm.map(f64::from));
    let speed = Aggregate::of(readings, |r| r.speed_mph);
    let coolant = Aggregate::of(readings, |r| r.coolant_temp_f);
    let throttle = Aggregate::of(readings, |r| r.throttle_pct);

    Some(RecentStats {
        readings_analyzed: readings.len(),
        average_rpm: rounded(rpm.average(), 1),
        average_speed_mph: rounded(speed.average(), 1),
        max_coolant_temp_f: rounded(coolant.max(), 1),
        min_coolant_temp_f: rounded(coolant.min(), 1),
        average_throttle_pct: rounded(throttle.average(), 1),
    })
}
