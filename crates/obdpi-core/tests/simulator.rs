//! Simulated signal generator: determinism, ranges and signal independence.

use chrono::{TimeZone, Utc};
use obdpi_core::demo::DemoSimulator;
use obdpi_core::Reading;
use proptest::prelude::*;

fn series(field: impl Fn(&Reading) -> f64) -> Vec<f64> {
    let sim = DemoSimulator::new();
    let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    (0..2000)
        .map(|tick| field(&sim.generate(tick as f64 * 0.25, ts)))
        .collect()
}

fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let cov: f64 = a.iter().zip(b).map(|(x, y)| (x - mean_a) * (y - mean_b)).sum();
    let var_a: f64 = a.iter().map(|x| (x - mean_a).powi(2)).sum();
    let var_b: f64 = b.iter().map(|y| (y - mean_b).powi(2)).sum();
    cov / (var_a.sqrt() * var_b.sqrt())
}

#[test]
fn test_signals_not_linearly_dependent() {
    let signals = [
        series(|r| f64::from(r.rpm.unwrap())),
        series(|r| r.speed_mph.unwrap()),
        series(|r| r.coolant_temp_f.unwrap()),
        series(|r| r.throttle_pct.unwrap()),
        series(|r| r.load_pct.unwrap()),
        series(|r| r.maf_gps.unwrap()),
    ];
    for i in 0..signals.len() {
        for j in (i + 1)..signals.len() {
            let r = correlation(&signals[i], &signals[j]);
            assert!(r.abs() < 0.95, "signals {i} and {j} move together (r = {r:.3})");
        }
    }
}

#[test]
fn test_profiles_have_distinct_periods() {
    let sim = DemoSimulator::new();
    let p = sim.profiles();
    let periods = [
        p.rpm.period,
        p.speed_mph.period,
        p.coolant_temp_f.period,
        p.throttle_pct.period,
        p.load_pct.period,
        p.maf_gps.period,
    ];
    for i in 0..periods.len() {
        for j in (i + 1)..periods.len() {
            assert_ne!(periods[i], periods[j]);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Same phase, same reading.
    #[test]
    fn prop_generate_is_deterministic(phase in -1.0e6f64..1.0e6) {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let a = DemoSimulator::new().generate(phase, ts);
        let b = DemoSimulator::new().generate(phase, ts);
        prop_assert_eq!(a, b);
    }

    /// Every field present and inside plausible idle-engine ranges.
    #[test]
    fn prop_values_plausible(phase in -1.0e6f64..1.0e6) {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let reading = DemoSimulator::new().generate(phase, ts);
        prop_assert_eq!(reading.present_fields(), 6);
        prop_assert!((750..=1100).contains(&reading.rpm.unwrap()));
        prop_assert!((180.0..=190.0).contains(&reading.coolant_temp_f.unwrap()));
        prop_assert!((0.0..=100.0).contains(&reading.throttle_pct.unwrap()));
        prop_assert!((0.0..=100.0).contains(&reading.load_pct.unwrap()));
        prop_assert!(reading.maf_gps.unwrap() >= 0.0);
        prop_assert!(reading.speed_mph.unwrap() >= 0.0);
    }
}
