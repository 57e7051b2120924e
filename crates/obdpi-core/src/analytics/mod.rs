//! Trip analytics
//!
//! Works on closed, already-stored time ranges; never on in-flight
//! acquisition state.

pub mod aggregate;
pub mod summary;
pub mod trip;
pub mod vehicle_state;

pub use aggregate::Aggregate;
pub use summary::{
    estimate_fuel, integrate_distance, summarize_recent, summarize_trip, DtMode, FuelEstimate,
    RecentStats, SummaryOptions, TripReport, TripSummary, NO_MAF_NOTE,
};
pub use trip::{Trip, TripEnd, TripTracker};
pub use vehicle_state::{classify, TempBand, ThrottleBand, VehicleState};
