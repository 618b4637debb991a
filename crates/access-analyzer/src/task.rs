//! One satellite's complete run

use chrono::{DateTime, Utc};
use ground_stations::GroundStation;
use orbital_mechanics::ephemeris::{AnalyticSun, SolarEphemeris};
use orbital_mechanics::{StateVector, TrajectorySource};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};

use crate::accumulator::{AccessWindow, AccessWindowAccumulator, EndOfRunPolicy};
use crate::angles::AngleComputer;
use crate::detector::{ElevationDetector, InitialPassPolicy, Phase, VisibilityEvent};
use crate::sampler::StateSampler;
use crate::satellite::{Satellite, StationLink, TimeWindow};
use crate::scheduler::CancelToken;
use crate::sink::{OutputSink, SinkFactory};
use crate::{AnalyzerError, Result};

/// Read-only environment shared by every task of a batch.
///
/// Stations are not part of it: each [`Satellite`] carries its own links.
#[derive(Clone)]
pub struct AnalysisContext {
    pub ephemeris: Arc<dyn SolarEphemeris>,
    pub initial_pass: InitialPassPolicy,
    pub end_of_run: EndOfRunPolicy,
}

impl Default for AnalysisContext {
    fn default() -> Self {
        Self {
            ephemeris: Arc::new(AnalyticSun),
            initial_pass: InitialPassPolicy::default(),
            end_of_run: EndOfRunPolicy::default(),
        }
    }
}

impl AnalysisContext {
    pub fn with_ephemeris(mut self, ephemeris: Arc<dyn SolarEphemeris>) -> Self {
        self.ephemeris = ephemeris;
        self
    }

    pub fn with_initial_pass(mut self, policy: InitialPassPolicy) -> Self {
        self.initial_pass = policy;
        self
    }

    pub fn with_end_of_run(mut self, policy: EndOfRunPolicy) -> Self {
        self.end_of_run = policy;
        self
    }
}

impl std::fmt::Debug for AnalysisContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisContext")
            .field("initial_pass", &self.initial_pass)
            .field("end_of_run", &self.end_of_run)
            .finish_non_exhaustive()
    }
}

/// Counters of a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub satellite: String,
    pub samples: u64,
    /// Samples whose geometry could not be computed
    pub skipped_samples: u64,
    /// Windows emitted per station id
    pub windows: BTreeMap<String, u32>,
}

impl RunSummary {
    fn new(satellite: &str) -> Self {
        Self {
            satellite: satellite.to_string(),
            ..Self::default()
        }
    }

    pub fn total_windows(&self) -> u32 {
        self.windows.values().sum()
    }
}

/// Visibility state of one (satellite, station) pair
struct StationTracker {
    station: Arc<GroundStation>,
    detector: ElevationDetector,
    accumulator: AccessWindowAccumulator,
}

impl StationTracker {
    fn new(satellite_id: &str, link: &StationLink) -> Result<Self> {
        Ok(Self {
            station: link.station.clone(),
            detector: ElevationDetector::new(link.settings)?,
            accumulator: AccessWindowAccumulator::new(satellite_id, link.station.id.clone()),
        })
    }

    /// Feed one sample, returning the windows it closed
    fn step(
        &mut self,
        state: &StateVector,
        trajectory: &dyn TrajectorySource,
        satellite_id: &str,
        initial_pass: InitialPassPolicy,
    ) -> Result<Vec<AccessWindow>> {
        let station = self.station.clone();
        let elevation = station.frame().elevation_deg(state);

        if self.detector.phase().is_none() {
            let phase = self.detector.start(state.epoch, elevation);
            if phase == Phase::Above {
                match initial_pass {
                    InitialPassPolicy::OpenAtStart => self.accumulator.open(state.epoch),
                    InitialPassPolicy::SkipPartial => debug!(
                        satellite = %satellite_id,
                        station = %station.id,
                        "skipping pass in progress at {}",
                        state.epoch
                    ),
                }
            }
            return Ok(Vec::new());
        }

        let advanced = self.detector.advance(state.epoch, elevation, |t| -> Result<f64> {
            let intermediate = trajectory
                .state(satellite_id, t)
                .map_err(|source| AnalyzerError::Trajectory {
                    satellite: satellite_id.to_string(),
                    source,
                })?;
            let elevation = station.frame().elevation_deg(&intermediate);
            if elevation.is_finite() {
                Ok(elevation)
            } else {
                Err(AnalyzerError::Geometry(format!("non-finite elevation at {}", t)))
            }
        });
        let events = match advanced {
            Ok(events) => events,
            Err(AnalyzerError::Geometry(reason)) => {
                warn!(
                    satellite = %satellite_id,
                    station = %station.id,
                    "{}, resuming detection at {}",
                    reason,
                    state.epoch
                );
                self.detector.resync(state.epoch, elevation).into_iter().collect()
            },
            Err(e) => return Err(e),
        };

        let mut closed = Vec::new();
        for event in events {
            match event {
                VisibilityEvent::Enter(t) => self.accumulator.open(t),
                VisibilityEvent::Exit(t) => closed.extend(self.accumulator.close(t)),
            }
        }
        Ok(closed)
    }

    fn finish(&mut self, last: DateTime<Utc>, policy: EndOfRunPolicy) -> Option<AccessWindow> {
        self.accumulator.finish(last, policy)
    }
}

/// Runs the sampling pipeline for one satellite.
#[derive(Debug, Clone)]
pub struct SatelliteTask {
    satellite: Satellite,
}

impl SatelliteTask {
    pub fn new(satellite: Satellite) -> Self {
        Self { satellite }
    }

    pub fn satellite(&self) -> &Satellite {
        &self.satellite
    }

    /// Validate, open the sink, sample the whole window and close the sink.
    ///
    /// The sink is closed even when the run fails part way; rows written so
    /// far stay on disk.
    pub fn run<F: SinkFactory>(
        &self,
        ctx: &AnalysisContext,
        factory: &F,
        cancel: &CancelToken,
    ) -> Result<RunSummary> {
        let span = info_span!("satellite", id = %self.satellite.id);
        let _enter = span.enter();

        let (trajectory, window) = self.satellite.run_parameters().map_err(|e| {
            warn!("Refusing run: {}", e);
            e
        })?;
        let mut trackers = BTreeMap::new();
        for link in self.satellite.stations() {
            trackers.insert(link.station.id.clone(), StationTracker::new(&self.satellite.id, link)?);
        }
        if self.satellite.outputs().access && trackers.is_empty() {
            debug!("Access output enabled without stations");
        }

        info!(
            "Analysing {} from {} to {} every {} s against {} station(s)",
            self.satellite.name,
            window.start(),
            window.end(),
            window.step_s(),
            trackers.len()
        );

        let mut sink = factory.open(&self.satellite)?;
        let result = self.sample(ctx, &**trajectory, window, &mut trackers, &mut sink, cancel);
        let closed = sink.close();

        match (result, closed) {
            (Ok(summary), Ok(())) => {
                info!(
                    samples = summary.samples,
                    skipped = summary.skipped_samples,
                    windows = summary.total_windows(),
                    "Run complete"
                );
                Ok(summary)
            },
            (Ok(_), Err(e)) => Err(e),
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!("Closing output after failure also failed: {}", close_err);
                }
                Err(e)
            },
        }
    }

    fn sample<S: OutputSink>(
        &self,
        ctx: &AnalysisContext,
        trajectory: &dyn TrajectorySource,
        window: TimeWindow,
        trackers: &mut BTreeMap<String, StationTracker>,
        sink: &mut S,
        cancel: &CancelToken,
    ) -> Result<RunSummary> {
        let id = self.satellite.id.as_str();
        let outputs = self.satellite.outputs();
        let computer = AngleComputer::new(ctx.ephemeris.clone());
        let mut summary = RunSummary::new(id);
        let mut last_epoch = None;

        for state in StateSampler::new(window).states(trajectory, id) {
            if cancel.is_cancelled() {
                info!("Cancelled after {} samples", summary.samples);
                return Err(AnalyzerError::Cancelled);
            }
            let state = state?;
            summary.samples += 1;
            last_epoch = Some(state.epoch);

            if !state.is_finite() {
                summary.skipped_samples += 1;
                warn!("Skipping non-finite state at {}", state.epoch);
                continue;
            }

            if outputs.sun || outputs.earth {
                match computer.compute(&state) {
                    Ok((sun, earth)) => {
                        if outputs.sun {
                            sink.write_sun(&sun)?;
                        }
                        if outputs.earth {
                            sink.write_earth(&earth)?;
                        }
                    },
                    Err(AnalyzerError::Geometry(reason)) => {
                        summary.skipped_samples += 1;
                        warn!("Skipping sample: {}", reason);
                    },
                    Err(e) => return Err(e),
                }
            }

            if outputs.access {
                for (station_id, tracker) in trackers.iter_mut() {
                    for access in tracker.step(&state, trajectory, id, ctx.initial_pass)? {
                        debug!(
                            station = %station_id,
                            "Access #{} {} -> {} ({:.3} s)",
                            access.sequence,
                            access.start,
                            access.end,
                            access.duration_s
                        );
                        sink.write_window(&access)?;
                        *summary.windows.entry(station_id.clone()).or_default() += 1;
                    }
                }
            }
        }

        if let (Some(last), true) = (last_epoch, outputs.access) {
            for (station_id, tracker) in trackers.iter_mut() {
                if let Some(access) = tracker.finish(last, ctx.end_of_run) {
                    sink.write_window(&access)?;
                    *summary.windows.entry(station_id.clone()).or_default() += 1;
                }
            }
        }
        for station_id in trackers.keys() {
            summary.windows.entry(station_id.clone()).or_default();
        }

        Ok(summary)
    }
}
