use chrono::{TimeZone, Utc};
use obdpi_core::analytics::{classify, TempBand, ThrottleBand};
use obdpi_core::Reading;

fn with_coolant(f: f64) -> Reading {
    Reading {
        coolant_temp_f: Some(f),
        ..Reading::empty(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap())
    }
}

#[test]
fn test_temperature_band_boundaries() {
    assert_eq!(classify(&with_coolant(139.9)).engine_temp_status, TempBand::Cool);
    assert_eq!(classify(&with_coolant(140.0)).engine_temp_status, TempBand::Normal);
    assert_eq!(classify(&with_coolant(220.0)).engine_temp_status, TempBand::Normal);
    assert_eq!(classify(&with_coolant(220.1)).engine_temp_status, TempBand::Hot);
}

#[test]
fn test_empty_reading_is_unknown_not_crash() {
    let reading = Reading::empty(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
    let state = classify(&reading);
    assert!(!state.is_moving);
    assert_eq!(state.engine_temp_status, TempBand::Unknown);
    assert_eq!(state.throttle_activity, ThrottleBand::Unknown);
    assert_eq!(state.latest_reading, reading);
}

#[test]
fn test_state_json() {
    let reading = Reading {
        speed_mph: Some(42.0),
        throttle_pct: Some(35.0),
        ..with_coolant(190.0)
    };
    let json = serde_json::to_value(classify(&reading)).unwrap();
    assert_eq!(json["is_moving"], true);
    assert_eq!(json["engine_temp_status"], "normal");
    assert_eq!(json["throttle_activity"], "high");
    assert_eq!(json["latest_reading"]["speed_mph"], 42.0);
}
