//! Demo Mode - Simulated sensor generator
//!
//! Produces plausible idle-engine readings when no adapter is available.
//! Every signal is `base + amplitude * sin(phase / period + offset)`, so the
//! output depends only on the phase it is given.

use chrono::{DateTime, Utc};

use crate::reading::Reading;
use crate::unit_conversion::round_to;

/// One sinusoidal signal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalProfile {
    /// Center value
    pub base: f64,
    /// Peak deviation from `base`
    pub amplitude: f64,
    /// Phase divisor (larger = slower)
    pub period: f64,
    /// Phase offset in radians
    pub offset: f64,
}

impl SignalProfile {
    /// Create a signal profile
    pub const fn new(base: f64, amplitude: f64, period: f64, offset: f64) -> Self {
        Self {
            base,
            amplitude,
            period,
            offset,
        }
    }

    /// Evaluate the signal at `phase`
    pub fn sample(&self, phase: f64) -> f64 {
        self.base + self.amplitude * (phase / self.period + self.offset).sin()
    }

    /// Lowest value the signal can take
    pub fn min(&self) -> f64 {
        self.base - self.amplitude.abs()
    }

    /// Highest value the signal can take
    pub fn max(&self) -> f64 {
        self.base + self.amplitude.abs()
    }
}

/// Per-signal profiles used by the simulator
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorProfiles {
    /// Engine speed, ~750-1100 rpm
    pub rpm: SignalProfile,
    /// Vehicle speed, 0-45 mph
    pub speed_mph: SignalProfile,
    /// Coolant, ~180-190 °F
    pub coolant_temp_f: SignalProfile,
    /// Throttle, 0-25 %
    pub throttle_pct: SignalProfile,
    /// Engine load, 5-25 %
    pub load_pct: SignalProfile,
    /// Mass air flow, 2-8 g/s
    pub maf_gps: SignalProfile,
}

impl Default for SimulatorProfiles {
    fn default() -> Self {
        // Periods are pairwise distinct so no two signals move in lockstep.
        Self {
            rpm: SignalProfile::new(925.0, 175.0, 2.0, 0.0),
            speed_mph: SignalProfile::new(22.5, 22.5, 5.0, 0.0),
            coolant_temp_f: SignalProfile::new(185.0, 5.0, 10.0, 0.0),
            throttle_pct: SignalProfile::new(12.5, 12.5, 1.43, 0.0),
            load_pct: SignalProfile::new(15.0, 10.0, 1.7, 0.6),
            maf_gps: SignalProfile::new(5.0, 3.0, 2.3, 1.1),
        }
    }
}

/// Simulated ECU that generates deterministic sensor data from a phase clock
#[derive(Debug, Clone, Default)]
pub struct DemoSimulator {
    profiles: SimulatorProfiles,
}

impl DemoSimulator {
    /// Create a simulator with the default idle-engine profiles
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a simulator with custom profiles
    pub fn with_profiles(profiles: SimulatorProfiles) -> Self {
        Self { profiles }
    }

    /// Signal profiles in use
    pub fn profiles(&self) -> &SimulatorProfiles {
        &self.profiles
    }

    /// Generate a reading for `phase`, stamped with `timestamp`.
    ///
    /// The same phase always yields the same sensor values. Values are
    /// rounded the same way adapter values are normalized.
    pub fn generate(&self, phase: f64, timestamp: DateTime<Utc>) -> Reading {
        let p = &self.profiles;
        Reading {
            rpm: Some(p.rpm.sample(phase).max(0.0).trunc() as u32),
            speed_mph: Some(round_to(p.speed_mph.sample(phase).max(0.0), 1)),
            coolant_temp_f: Some(round_to(p.coolant_temp_f.sample(phase), 1)),
            throttle_pct: Some(round_to(p.throttle_pct.sample(phase).clamp(0.0, 100.0), 1)),
            load_pct: Some(round_to(p.load_pct.sample(phase).clamp(0.0, 100.0), 1)),
            maf_gps: Some(round_to(p.maf_gps.sample(phase).max(0.0), 2)),
            ..Reading::empty(timestamp)
        }
    }

    /// Generate a reading using wall-clock seconds as the phase
    pub fn generate_at(&self, timestamp: DateTime<Utc>) -> Reading {
        let phase = timestamp.timestamp() as f64;
        self.generate(phase, timestamp)
    }
}
