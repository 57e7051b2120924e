//! # OBD Pi Core Library
//!
//! Vehicle telemetry over OBD-II for a small always-on logger.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - ELM327 adapter communication over serial, Bluetooth RFCOMM or TCP
//! - Connection lifecycle with reconnect and simulation fallback
//! - A 1 Hz acquisition loop producing normalized [`Reading`]s
//! - Reading stores (in-memory ring, JSON lines)
//! - Trip analytics: distance, MAF-based fuel and MPG estimates
//!
//! ## Example
//!
//! ```rust,no_run
//! use obdpi_core::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LoggerConfig::load_or_default("config.json")?;
//! let driver = Elm327Driver::system(config.adapter.clone());
//! let acquisition = Acquisition::new(driver, config.acquisition.to_config());
//! let store = JsonLinesStore::open(&config.storage.path)?;
//!
//! let cancel = CancellationToken::new();
//! let stats = run(acquisition, store, cancel.clone()).await;
//! println!("{} readings stored", stats.appended);
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod analytics;
pub mod config;
pub mod demo;
pub mod protocol;
pub mod reading;
pub mod store;
pub mod unit_conversion;

pub use reading::Reading;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::acquisition::{run, Acquisition, AcquisitionConfig, AcquisitionStats};
    pub use crate::analytics::{
        classify, summarize_recent, summarize_trip, DtMode, RecentStats, SummaryOptions, Trip,
        TripEnd, TripReport, TripSummary, TripTracker, VehicleState,
    };
    pub use crate::config::{ConfigError, LoggerConfig};
    pub use crate::demo::DemoSimulator;
    pub use crate::protocol::{
        AdapterDriver, AdapterSettings, ConnectionManager, ConnectionState, Elm327Driver,
        ObdHandle, ProtocolError,
    };
    pub use crate::reading::Reading;
    pub use crate::store::{recent_window, JsonLinesStore, MemoryStore, ReadingSink, StoreError};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
