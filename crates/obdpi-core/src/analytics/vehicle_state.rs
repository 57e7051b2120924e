//! Vehicle state classification from the latest reading

use serde::{Deserialize, Serialize};

use crate::reading::Reading;

/// Speed above which the vehicle counts as moving (absorbs sensor noise at standstill)
pub const MOVING_THRESHOLD_MPH: f64 = 1.0;

/// Coolant below this is cool
pub const COOL_BELOW_F: f64 = 140.0;

/// Coolant above this is hot
pub const HOT_ABOVE_F: f64 = 220.0;

/// Throttle below this is idle
pub const IDLE_BELOW_PCT: f64 = 5.0;

/// Throttle above this is high
pub const HIGH_ABOVE_PCT: f64 = 30.0;

/// Engine temperature band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempBand {
    /// Below 140 °F
    Cool,
    /// 140 to 220 °F
    Normal,
    /// Above 220 °F
    Hot,
    /// No coolant reading
    Unknown,
}

/// Throttle activity band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleBand {
    /// Below 5 %
    Idle,
    /// 5 to 30 %
    Light,
    /// Above 30 %
    High,
    /// No throttle reading
    Unknown,
}

/// Interpreted snapshot of the latest reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    /// Speed above the standstill threshold
    pub is_moving: bool,
    /// Coolant band
    pub engine_temp_status: TempBand,
    /// Throttle band
    pub throttle_activity: ThrottleBand,
    /// The classified reading
    pub latest_reading: Reading,
}

/// Moving when speed is present and above 1 mph
pub fn is_moving(speed_mph: Option<f64>) -> bool {
    speed_mph.is_some_and(|s| s > MOVING_THRESHOLD_MPH)
}

/// `<140` cool, `140..=220` normal, `>220` hot
pub fn temp_band(coolant_temp_f: Option<f64>) -> TempBand {
    match coolant_temp_f {
        Some(t) if t < COOL_BELOW_F => TempBand::Cool,
        Some(t) if t <= HOT_ABOVE_F => TempBand::Normal,
        Some(t) if t > HOT_ABOVE_F => TempBand::Hot,
        _ => TempBand::Unknown,
    }
}

/// `<5` idle, `5..=30` light, `>30` high
pub fn throttle_band(throttle_pct: Option<f64>) -> ThrottleBand {
    match throttle_pct {
        Some(t) if t < IDLE_BELOW_PCT => ThrottleBand::Idle,
        Some(t) if t <= HIGH_ABOVE_PCT => ThrottleBand::Light,
        Some(t) if t > HIGH_ABOVE_PCT => ThrottleBand::High,
        _ => ThrottleBand::Unknown,
    }
}

/// Classify a reading
pub fn classify(reading: &Reading) -> VehicleState {
    VehicleState {
        is_moving: is_moving(reading.speed_mph),
        engine_temp_status: temp_band(reading.coolant_temp_f),
        throttle_activity: throttle_band(reading.throttle_pct),
        latest_reading: reading.clone(),
    }
}
