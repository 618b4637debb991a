//! Satellite run configuration

use chrono::{DateTime, Utc};
use ground_stations::GroundStation;
use orbital_mechanics::{time, TrajectorySource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{detector::DetectorSettings, AnalyzerError, Result};

/// Analysis span and sampling step. Always `step_s > 0` and `end >= start`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step_s: f64,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, step_s: f64) -> Result<Self> {
        if !(step_s.is_finite() && step_s > 0.0) {
            return Err(AnalyzerError::Configuration(format!(
                "time step must be > 0 (got {})",
                step_s
            )));
        }
        if end < start {
            return Err(AnalyzerError::Configuration(format!(
                "end {} precedes start {}",
                end, start
            )));
        }
        Ok(Self { start, end, step_s })
    }

    pub fn with_duration(start: DateTime<Utc>, duration_s: f64, step_s: f64) -> Result<Self> {
        if !(duration_s.is_finite() && duration_s >= 0.0) {
            return Err(AnalyzerError::Configuration(format!(
                "duration must be >= 0 (got {})",
                duration_s
            )));
        }
        Self::new(start, time::shifted_by(start, duration_s), step_s)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn step_s(&self) -> f64 {
        self.step_s
    }

    pub fn duration_s(&self) -> f64 {
        time::seconds_between(self.start, self.end)
    }
}

/// Which products a run writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSwitches {
    #[serde(default = "enabled")]
    pub sun: bool,
    #[serde(default = "enabled")]
    pub earth: bool,
    #[serde(default = "enabled")]
    pub access: bool,
}

fn enabled() -> bool {
    true
}

impl Default for OutputSwitches {
    fn default() -> Self {
        Self {
            sun: true,
            earth: true,
            access: true,
        }
    }
}

impl OutputSwitches {
    pub fn any(&self) -> bool {
        self.sun || self.earth || self.access
    }
}

/// A station the satellite is checked against, with its own detector settings
#[derive(Debug, Clone)]
pub struct StationLink {
    pub station: Arc<GroundStation>,
    pub settings: DetectorSettings,
}

/// One satellite's run: trajectory, time window, outputs and stations.
///
/// Built incrementally; [`Satellite::validate`] refuses incomplete setups
/// before anything is opened or written.
#[derive(Clone)]
pub struct Satellite {
    pub id: String,
    pub name: String,
    trajectory: Option<Arc<dyn TrajectorySource>>,
    window: Option<TimeWindow>,
    outputs: OutputSwitches,
    stations: Vec<StationLink>,
}

impl Satellite {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            trajectory: None,
            window: None,
            outputs: OutputSwitches::default(),
            stations: Vec::new(),
        }
    }

    pub fn with_trajectory(mut self, trajectory: Arc<dyn TrajectorySource>) -> Self {
        self.trajectory = Some(trajectory);
        self
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_outputs(mut self, outputs: OutputSwitches) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn set_sun_output(&mut self, enabled: bool) {
        self.outputs.sun = enabled;
    }

    pub fn set_earth_output(&mut self, enabled: bool) {
        self.outputs.earth = enabled;
    }

    pub fn set_access_output(&mut self, enabled: bool) {
        self.outputs.access = enabled;
    }

    /// Check this satellite against `station`. Each station at most once.
    pub fn register_station(&mut self, station: Arc<GroundStation>, settings: DetectorSettings) -> Result<()> {
        settings.validate()?;
        if self.stations.iter().any(|link| link.station.id == station.id) {
            return Err(AnalyzerError::Configuration(format!(
                "station {} registered twice on satellite {}",
                station.id, self.id
            )));
        }
        self.stations.push(StationLink { station, settings });
        Ok(())
    }

    pub fn trajectory(&self) -> Option<&Arc<dyn TrajectorySource>> {
        self.trajectory.as_ref()
    }

    pub fn window(&self) -> Option<&TimeWindow> {
        self.window.as_ref()
    }

    pub fn outputs(&self) -> OutputSwitches {
        self.outputs
    }

    pub fn stations(&self) -> &[StationLink] {
        &self.stations
    }

    /// Refuse the run unless it has everything it needs
    pub fn validate(&self) -> Result<()> {
        self.run_parameters().map(|_| ())
    }

    /// Trajectory and window of a complete configuration
    pub fn run_parameters(&self) -> Result<(&Arc<dyn TrajectorySource>, TimeWindow)> {
        if self.id.trim().is_empty() {
            return Err(AnalyzerError::Configuration("satellite id is empty".into()));
        }
        let trajectory = self.trajectory.as_ref().ok_or_else(|| {
            AnalyzerError::Configuration(format!("satellite {} has no trajectory", self.id))
        })?;
        let window = self.window.ok_or_else(|| {
            AnalyzerError::Configuration(format!("satellite {} has no time window", self.id))
        })?;
        for link in &self.stations {
            link.settings.check_step(window.step_s()).map_err(|e| {
                AnalyzerError::Configuration(format!(
                    "satellite {} over station {}: {}",
                    self.id, link.station.id, e
                ))
            })?;
        }
        Ok((trajectory, window))
    }
}

impl std::fmt::Debug for Satellite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Satellite")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("has_trajectory", &self.trajectory.is_some())
            .field("window", &self.window)
            .field("outputs", &self.outputs)
            .field("stations", &self.stations.iter().map(|l| &l.station.id).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ground_stations::{GeoLocation, Wgs84FrameProvider};
    use orbital_mechanics::propagation::{KeplerianElements, KeplerianSource};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
    }

    fn trajectory() -> Arc<dyn TrajectorySource> {
        Arc::new(KeplerianSource::new(KeplerianElements::circular(700.0, 98.1929, 10.5834, t0())).unwrap())
    }

    fn station(id: &str) -> Arc<GroundStation> {
        let location = GeoLocation {
            latitude: 47.6652,
            longitude: 7.84965,
            altitude_m: 325.036,
        };
        Arc::new(GroundStation::new(id, "Freiburg", location, &Wgs84FrameProvider).unwrap())
    }

    #[test]
    fn test_time_window_validation() {
        assert!(TimeWindow::new(t0(), t0(), 60.0).is_ok());
        assert!(matches!(
            TimeWindow::new(t0(), t0() + chrono::Duration::seconds(60), 0.0),
            Err(AnalyzerError::Configuration(_))
        ));
        assert!(matches!(
            TimeWindow::new(t0(), t0() - chrono::Duration::seconds(1), 60.0),
            Err(AnalyzerError::Configuration(_))
        ));
        assert!(TimeWindow::new(t0(), t0(), f64::NAN).is_err());
        assert!(TimeWindow::with_duration(t0(), -1.0, 60.0).is_err());
        let week = TimeWindow::with_duration(t0(), 604_800.0, 60.0).unwrap();
        assert_eq!(week.end(), t0() + chrono::Duration::days(7));
    }

    #[test]
    fn test_validate_requires_trajectory_and_window() {
        let sat = Satellite::new("SAT-1", "Test");
        assert!(matches!(sat.validate(), Err(AnalyzerError::Configuration(_))));

        let sat = sat.with_trajectory(trajectory());
        assert!(matches!(sat.validate(), Err(AnalyzerError::Configuration(_))));

        let sat = sat.with_window(TimeWindow::with_duration(t0(), 3600.0, 60.0).unwrap());
        assert!(sat.validate().is_ok());

        let unnamed = Satellite::new("  ", "Test")
            .with_trajectory(trajectory())
            .with_window(TimeWindow::with_duration(t0(), 3600.0, 60.0).unwrap());
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn test_register_station_once() {
        let mut sat = Satellite::new("SAT-1", "Test");
        sat.register_station(station("GS-1"), DetectorSettings::default()).unwrap();
        sat.register_station(station("GS-2"), DetectorSettings::default()).unwrap();
        assert!(sat.register_station(station("GS-1"), DetectorSettings::default()).is_err());
        let bad = DetectorSettings {
            max_check_s: 0.0,
            ..DetectorSettings::default()
        };
        assert!(sat.register_station(station("GS-3"), bad).is_err());
        assert_eq!(sat.stations().len(), 2);
    }

    #[test]
    fn test_refuses_max_check_far_below_step() {
        let mut sat = Satellite::new("SAT-1", "Test")
            .with_trajectory(trajectory())
            .with_window(TimeWindow::with_duration(t0(), 7.0 * 86_400.0, 86_400.0).unwrap());
        let tiny = DetectorSettings {
            max_check_s: 1.0e-6,
            root_tolerance_s: 1.0e-9,
            ..DetectorSettings::default()
        };
        sat.register_station(station("GS-1"), tiny).unwrap();
        let err = sat.validate().unwrap_err();
        assert!(matches!(&err, AnalyzerError::Configuration(m) if m.contains("GS-1")), "{}", err);
    }

    #[test]
    fn test_output_switches() {
        let mut sat = Satellite::new("SAT-1", "Test");
        assert!(sat.outputs().sun && sat.outputs().earth && sat.outputs().access);
        sat.set_sun_output(false);
        sat.set_earth_output(false);
        sat.set_access_output(false);
        assert!(!sat.outputs().any());

        let parsed: OutputSwitches = serde_json::from_str(r#"{"earth": false}"#).unwrap();
        assert_eq!(
            parsed,
            OutputSwitches {
                sun: true,
                earth: false,
                access: true
            }
        );
    }
}
