//! Satellite Access Analyzer
//!
//! Batch prediction of ground station access windows and of the Sun/Earth
//! geometry seen from each satellite's local orbital frame.
//!
//! # Pipeline
//!
//! ```text
//! BatchScheduler ──► SatelliteTask ──► StateSampler ──┬─► AngleComputer ───────────────► OutputSink
//!   (one per sat)                                    └─► ElevationDetector × stations
//!                                                          └─► AccessWindowAccumulator ─► OutputSink
//! ```
//!
//! | Stage | Module |
//! |-------|--------|
//! | Fixed-step sampling | [`sampler`] |
//! | Sun/Earth azimuth-elevation | [`angles`] |
//! | Threshold crossing detection | [`detector`] |
//! | Window bookkeeping | [`accumulator`] |
//! | Per-satellite pipeline | [`task`] |
//! | Worker pool | [`scheduler`] |
//! | CSV / in-memory output | [`sink`] |
//! | JSON configuration | [`config`] |

use thiserror::Error;

pub mod accumulator;
pub mod angles;
pub mod config;
pub mod detector;
pub mod sampler;
pub mod satellite;
pub mod scheduler;
pub mod sink;
pub mod task;

pub use accumulator::{AccessWindow, AccessWindowAccumulator, EndOfRunPolicy};
pub use angles::{AngleComputer, EarthAngleSample, LocalOrbitalFrame, SunAngleSample};
pub use detector::{DetectorSettings, ElevationDetector, InitialPassPolicy, Phase, VisibilityEvent};
pub use sampler::StateSampler;
pub use satellite::{OutputSwitches, Satellite, StationLink, TimeWindow};
pub use scheduler::{cancel_pair, BatchEntry, BatchReport, BatchScheduler, CancelHandle, CancelToken, TaskOutcome};
pub use sink::{CsvSinkFactory, MemorySinkFactory, OutputSink, SatelliteOutput, SinkFactory};
pub use task::{AnalysisContext, RunSummary, SatelliteTask};

/// Default elevation mask for access windows [deg]
pub const DEFAULT_THRESHOLD_DEG: f64 = 10.0;

/// Default spacing between coarse elevation sign checks [s]
pub const DEFAULT_MAX_CHECK_S: f64 = 60.0;

/// Default precision of refined crossing times [s]
pub const DEFAULT_ROOT_TOLERANCE_S: f64 = 0.001;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Trajectory error for {satellite}: {source}")]
    Trajectory {
        satellite: String,
        #[source]
        source: orbital_mechanics::OrbitalError,
    },
    #[error("Geometry error: {0}")]
    Geometry(String),
    #[error("Station error: {0}")]
    Station(#[from] ground_stations::StationError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Run cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;
