//! Unit Conversion Functions
//!
//! Converts raw adapter magnitudes into the canonical [`Reading`](crate::reading::Reading) units:
//! - Speed: km/h → mph
//! - Temperature: °C → °F
//! - Percent fields: pass through, 1 decimal
//! - Mass air flow: pass through in g/s, 2 decimals
//! - RPM: truncated to an integer
//!
//! All rounding is half-away-from-zero ([`f64::round`]). A value that cannot be
//! converted (wrong source unit, out of range, not finite) becomes `None`.

use serde::{Deserialize, Serialize};

/// km/h → mph factor
pub const MPH_PER_KMH: f64 = 0.621371;

/// Milliliters in one US gallon
pub const ML_PER_US_GALLON: f64 = 3785.41;

/// Stoichiometric air-fuel ratio for gasoline
pub const STOICH_AFR_GASOLINE: f64 = 14.7;

/// Gasoline density in g/mL
pub const GASOLINE_DENSITY_G_PER_ML: f64 = 0.74;

/// Unit attached to a raw adapter magnitude
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawUnit {
    /// Revolutions per minute
    Rpm,
    /// Kilometers per hour
    KilometersPerHour,
    /// Miles per hour
    MilesPerHour,
    /// Degrees Celsius
    Celsius,
    /// Degrees Fahrenheit
    Fahrenheit,
    /// Percent (0-100)
    Percent,
    /// Grams per second
    GramsPerSecond,
}

/// A decoded adapter value before normalization
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawValue {
    /// Numeric magnitude in `unit`
    pub magnitude: f64,
    /// Source unit
    pub unit: RawUnit,
}

impl RawValue {
    /// Create a raw value
    pub fn new(magnitude: f64, unit: RawUnit) -> Self {
        Self { magnitude, unit }
    }
}

/// Round half away from zero to `decimals` places
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Convert Celsius to Fahrenheit
pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

/// Convert Fahrenheit to Celsius
pub fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

/// Convert km/h to mph
pub fn kmh_to_mph(kmh: f64) -> f64 {
    kmh * MPH_PER_KMH
}

/// Convert mph to km/h
pub fn mph_to_kmh(mph: f64) -> f64 {
    mph / MPH_PER_KMH
}

/// Convert milliliters to US gallons
pub fn milliliters_to_gallons_us(ml: f64) -> f64 {
    ml / ML_PER_US_GALLON
}

/// Fuel mass burned for a given air mass at the given air-fuel ratio
pub fn air_mass_to_fuel_mass(air_g: f64, afr: f64) -> f64 {
    air_g / afr
}

/// Fuel volume in mL for a mass of gasoline in grams
pub fn gasoline_mass_to_volume_ml(fuel_g: f64) -> f64 {
    fuel_g / GASOLINE_DENSITY_G_PER_ML
}

fn finite(raw: Option<RawValue>) -> Option<RawValue> {
    raw.filter(|r| r.magnitude.is_finite())
}

/// Normalize engine speed; truncates toward zero
pub fn normalize_rpm(raw: Option<RawValue>) -> Option<u32> {
    let raw = finite(raw)?;
    match raw.unit {
        RawUnit::Rpm if raw.magnitude >= 0.0 && raw.magnitude <= u32::MAX as f64 => {
            Some(raw.magnitude.trunc() as u32)
        }
        _ => None,
    }
}

/// Normalize vehicle speed to mph, 1 decimal
pub fn normalize_speed(raw: Option<RawValue>) -> Option<f64> {
    let raw = finite(raw)?;
    let mph = match raw.unit {
        RawUnit::KilometersPerHour => kmh_to_mph(raw.magnitude),
        RawUnit::MilesPerHour => raw.magnitude,
        _ => return None,
    };
    (mph >= 0.0).then(|| round_to(mph, 1))
}

/// Normalize a temperature to °F, 1 decimal
pub fn normalize_temperature(raw: Option<RawValue>) -> Option<f64> {
    let raw = finite(raw)?;
    let fahrenheit = match raw.unit {
        RawUnit::Celsius => celsius_to_fahrenheit(raw.magnitude),
        RawUnit::Fahrenheit => raw.magnitude,
        _ => return None,
    };
    Some(round_to(fahrenheit, 1))
}

/// Normalize a percent/ratio field, 1 decimal, constrained to [0, 100]
pub fn normalize_percent(raw: Option<RawValue>) -> Option<f64> {
    let raw = finite(raw)?;
    if raw.unit != RawUnit::Percent {
        return None;
    }
    let pct = round_to(raw.magnitude, 1);
    (0.0..=100.0).contains(&pct).then_some(pct)
}

/// Normalize mass air flow in g/s, 2 decimals
pub fn normalize_maf(raw: Option<RawValue>) -> Option<f64> {
    let raw = finite(raw)?;
    if raw.unit != RawUnit::GramsPerSecond || raw.magnitude < 0.0 {
        return None;
    }
    Some(round_to(raw.magnitude, 2))
}
