//! obdpi-logger - OBD-II sensor logger
//!
//! Runs the acquisition loop against an ELM327 adapter (or the simulator),
//! appends every reading to the JSON-lines store, and answers trip and
//! recent-data queries from that store.

#![deny(clippy::unwrap_used)]

mod sink;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use obdpi_core::acquisition::{run, Acquisition};
use obdpi_core::analytics::{classify, summarize_recent, TripEnd, TripReport, TripTracker};
use obdpi_core::config::{default_config_path, LoggerConfig};
use obdpi_core::protocol::{list_ports, Elm327Driver};
use obdpi_core::store::{recent_window, write_csv, JsonLinesStore, MemoryStore, ReadingSink};
use obdpi_core::Reading;
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::sink::EchoSink;

#[derive(Parser)]
#[command(name = "obdpi-logger")]
#[command(about = "Log OBD-II sensor readings and summarize trips")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true, env = "OBDPI_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the acquisition loop until interrupted
    Run {
        /// Never touch hardware; log simulated readings
        #[arg(long)]
        simulate: bool,

        /// Stop after this many readings
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        count: Option<u64>,
    },

    /// Trip control and summary
    #[command(subcommand)]
    Trip(TripCommands),

    /// Classify the latest reading
    State,

    /// Statistics over the most recent readings
    Stats {
        #[arg(long, default_value_t = 60)]
        limit: usize,
    },

    /// Readings from the last N seconds, newest first
    Recent {
        #[arg(long, default_value_t = 30)]
        seconds: u32,
    },

    /// Export every stored reading as CSV
    ExportCsv {
        /// Output file
        out: PathBuf,
    },

    /// List candidate adapter ports
    Ports,
}

#[derive(Subcommand, Debug, PartialEq)]
enum TripCommands {
    /// Start a trip now (restarts an active one)
    Start,
    /// End the active trip now
    End,
    /// Summarize the last finished trip
    Summary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    // stdout carries readings; logs go to stderr
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("obdpi_logger={level},obdpi_core={level}").into()
        }))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = LoggerConfig::load_or_default(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    match cli.command {
        Commands::Run { simulate, count } => run_logger(&config, simulate, count).await,
        Commands::Trip(cmd) => trip(&config, cmd),
        Commands::State => state(&config),
        Commands::Stats { limit } => stats(&config, limit),
        Commands::Recent { seconds } => recent(&config, seconds),
        Commands::ExportCsv { out } => export_csv(&config, out),
        Commands::Ports => {
            for port in list_ports() {
                match port.product {
                    Some(product) => println!("{}\t{}", port.name, product),
                    None => println!("{}", port.name),
                }
            }
            Ok(())
        }
    }
}

async fn run_logger(config: &LoggerConfig, simulate: bool, count: Option<u64>) -> Result<()> {
    let mut settings = config.acquisition.to_config();
    settings.force_simulation |= simulate;

    let store = JsonLinesStore::open_with_capacity(&config.storage.path, config.storage.memory_capacity)
        .with_context(|| format!("opening reading store {}", config.storage.path.display()))?;
    info!(path = %store.path().display(), existing = store.len(), "logging readings");

    let cancel = CancellationToken::new();
    let sink = EchoSink::new(store, count, cancel.clone());
    let driver = Elm327Driver::system(config.adapter.clone());
    let acquisition = Acquisition::new(driver, settings);

    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, stopping");
                cancel.cancel();
            }
        })
    };

    let stats = run(acquisition, sink, cancel).await;
    interrupt.abort();

    info!(
        ticks = stats.ticks,
        stored = stats.appended,
        simulated = stats.simulated,
        transport_failures = stats.transport_failures,
        reconnects = stats.reconnects,
        "logger finished"
    );
    if stats.sink_errors > 0 {
        warn!(errors = stats.sink_errors, "some readings were not stored");
    }
    Ok(())
}

/// Every reading in the file; a missing file is an empty history
fn load_history(config: &LoggerConfig) -> Result<Vec<Reading>> {
    let path = &config.storage.path;
    if !path.exists() {
        return Ok(Vec::new());
    }
    JsonLinesStore::load(path).with_context(|| format!("reading {}", path.display()))
}

/// Read-only snapshot of the whole history.
///
/// The writer may be appending concurrently, so the file is loaded rather
/// than opened as a store.
fn open_snapshot(config: &LoggerConfig) -> Result<MemoryStore> {
    let readings = load_history(config)?;
    let capacity = readings.len();
    Ok(MemoryStore::from_readings(readings, capacity))
}

fn trip_report(config: &LoggerConfig, tracker: &TripTracker) -> Result<TripReport> {
    let store = open_snapshot(config)?;
    Ok(tracker.report(&store, &config.analytics)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn trip(config: &LoggerConfig, cmd: TripCommands) -> Result<()> {
    let path = config.storage.trip_path();
    let mut tracker = TripTracker::load_or_default(&path)
        .with_context(|| format!("loading trip state {}", path.display()))?;

    match cmd {
        TripCommands::Start => {
            let trip = tracker.start_trip(Utc::now());
            tracker.save(&path)?;
            print_json(&trip)
        }
        TripCommands::End => match tracker.end_trip(Utc::now()) {
            TripEnd::Ended(trip) => {
                tracker.save(&path)?;
                print_json(&trip)
            }
            TripEnd::NotActive => {
                println!("no active trip");
                Ok(())
            }
        },
        TripCommands::Summary => {
            match trip_report(config, &tracker)? {
                TripReport::Complete(summary) => print_json(&summary),
                TripReport::NoTrip => {
                    println!("no trip recorded");
                    Ok(())
                }
                TripReport::StillActive { start } => {
                    println!("trip still active since {}", start.to_rfc3339());
                    Ok(())
                }
                TripReport::NoData { start, end } => {
                    println!(
                        "no readings between {} and {}",
                        start.to_rfc3339(),
                        end.to_rfc3339()
                    );
                    Ok(())
                }
            }
        }
    }
}

fn state(config: &LoggerConfig) -> Result<()> {
    match open_snapshot(config)?.latest()? {
        Some(reading) => print_json(&classify(&reading)),
        None => {
            println!("no readings stored");
            Ok(())
        }
    }
}

fn stats(config: &LoggerConfig, limit: usize) -> Result<()> {
    let readings = open_snapshot(config)?.recent(limit)?;
    match summarize_recent(&readings) {
        Some(stats) => print_json(&stats),
        None => {
            println!("no readings stored");
            Ok(())
        }
    }
}

fn recent(config: &LoggerConfig, seconds: u32) -> Result<()> {
    let store = open_snapshot(config)?;
    for reading in recent_window(&store, Utc::now(), seconds)? {
        println!("{}", reading.to_json_line()?);
    }
    Ok(())
}

fn export_csv(config: &LoggerConfig, out: PathBuf) -> Result<()> {
    let readings = load_history(config)?;
    write_csv(&out, &readings).with_context(|| format!("writing {}", out.display()))?;
    info!(readings = readings.len(), out = %out.display(), "exported CSV");
    Ok(())
}
