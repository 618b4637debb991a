//! Scenario configuration from JSON files
//!
//! ```json
//! {
//!   "output_dir": "output",
//!   "workers": 4,
//!   "initial_pass": "open_at_start",
//!   "end_of_run": "drop",
//!   "stations": [
//!     { "id": "FR", "name": "Freiburg", "latitude": 47.6652, "longitude": 7.84965,
//!       "altitude_m": 325.036, "threshold_deg": 10.0, "max_check_s": 60.0, "root_tolerance_s": 0.001 }
//!   ],
//!   "satellites": [
//!     { "id": "SSO-700", "trajectory": { "type": "keplerian", "semi_major_axis_km": 7078.14,
//!       "inclination_deg": 98.1929, "raan_deg": 10.5834, "epoch": "2021-01-01T00:00:00Z" },
//!       "duration_s": 604800, "step_s": 60, "outputs": { "sun": true, "earth": true, "access": true } }
//!   ]
//! }
//! ```
//!
//! A satellite without a `stations` list is checked against every station.
//!
//! Station and satellite names (falling back to their ids) name the output
//! files and must stay distinct once made path-safe.
//!
//! Scenario-wide problems (stations, duplicate ids or names, worker count)
//! fail [`ScenarioConfig::build`]. A satellite that cannot be built on its
//! own is left out of the run and reported in [`Scenario::rejected`].

use chrono::{DateTime, TimeZone, Utc};
use ground_stations::{GeoLocation, GroundStation, StationRegistry, Wgs84FrameProvider};
use orbital_mechanics::propagation::{KeplerianElements, KeplerianSource, Sgp4Source};
use orbital_mechanics::{OrbitalError, TrajectorySource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::accumulator::EndOfRunPolicy;
use crate::detector::{DetectorSettings, InitialPassPolicy};
use crate::satellite::{OutputSwitches, Satellite, TimeWindow};
use crate::scheduler::{BatchEntry, TaskOutcome};
use crate::sink::file_stem;
use crate::task::AnalysisContext;
use crate::{AnalyzerError, Result};

/// Validate latitude is in valid range
fn is_valid_latitude(lat: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && lat.is_finite()
}

/// Validate longitude is in valid range
fn is_valid_longitude(lon: f64) -> bool {
    (-180.0..=180.0).contains(&lon) && lon.is_finite()
}

/// Identifiers end up in file paths: alphanumeric, dash, underscore only
fn sanitize_id(id: &str) -> String {
    id.chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .take(128)
        .collect()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_step_s() -> f64 {
    60.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Concurrent satellite tasks; all cores when absent
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub initial_pass: InitialPassPolicy,
    #[serde(default)]
    pub end_of_run: EndOfRunPolicy,
    #[serde(default)]
    pub stations: Vec<StationConfig>,
    pub satellites: Vec<SatelliteConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude_m: f64,
    #[serde(flatten)]
    pub detector: DetectorSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatelliteConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub trajectory: TrajectoryConfig,
    /// Defaults to the trajectory epoch
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_s: Option<f64>,
    #[serde(default = "default_step_s")]
    pub step_s: f64,
    #[serde(default)]
    pub outputs: OutputSwitches,
    /// Station ids; every configured station when absent
    #[serde(default)]
    pub stations: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrajectoryConfig {
    Tle {
        line1: String,
        line2: String,
    },
    Keplerian {
        semi_major_axis_km: f64,
        #[serde(default)]
        eccentricity: f64,
        inclination_deg: f64,
        raan_deg: f64,
        #[serde(default)]
        arg_perigee_deg: f64,
        #[serde(default)]
        mean_anomaly_deg: f64,
        epoch: DateTime<Utc>,
    },
}

/// Everything needed to launch a batch
#[derive(Debug)]
pub struct Scenario {
    pub context: AnalysisContext,
    pub stations: StationRegistry,
    pub satellites: Vec<Satellite>,
    /// Satellites refused while building, for the batch report
    pub rejected: Vec<BatchEntry>,
    pub output_dir: PathBuf,
    pub workers: Option<usize>,
}

/// Load a scenario from a JSON file
pub fn load_config(path: impl AsRef<Path>) -> Result<ScenarioConfig> {
    let path = path.as_ref();
    info!("Loading scenario from {:?}", path);

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let config: ScenarioConfig = serde_json::from_reader(reader)?;

    info!(
        "Loaded {} station(s) and {} satellite(s)",
        config.stations.len(),
        config.satellites.len()
    );
    Ok(config)
}

/// 700 km sun-synchronous orbit over Freiburg for one week at one minute
pub fn example_scenario() -> ScenarioConfig {
    let epoch = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).single().unwrap_or_default();
    ScenarioConfig {
        output_dir: default_output_dir(),
        workers: None,
        initial_pass: InitialPassPolicy::OpenAtStart,
        end_of_run: EndOfRunPolicy::Drop,
        stations: vec![StationConfig {
            id: "FR".into(),
            name: Some("Freiburg".into()),
            latitude: 47.6652,
            longitude: 7.84965,
            altitude_m: 325.036,
            detector: DetectorSettings::default(),
        }],
        satellites: vec![SatelliteConfig {
            id: "SSO-700".into(),
            name: Some("ERNST".into()),
            trajectory: TrajectoryConfig::Keplerian {
                semi_major_axis_km: 7078.14,
                eccentricity: 0.0,
                inclination_deg: 98.1929,
                raan_deg: 10.5834,
                arg_perigee_deg: 0.0,
                mean_anomaly_deg: 0.0,
                epoch,
            },
            start: Some(epoch),
            end: None,
            duration_s: Some(7.0 * 86_400.0),
            step_s: 60.0,
            outputs: OutputSwitches::default(),
            stations: None,
        }],
    }
}

impl ScenarioConfig {
    /// Validate and turn the configuration into runnable satellites.
    pub fn build(&self) -> Result<Scenario> {
        if let Some(0) = self.workers {
            return Err(AnalyzerError::Configuration("workers must be at least 1".into()));
        }

        let mut registry = StationRegistry::new();
        let mut station_files = BTreeSet::new();
        for config in &self.stations {
            let station = registry.insert(build_station(config)?)?;
            if !station_files.insert(file_stem(&station.name)) {
                return Err(AnalyzerError::Configuration(format!(
                    "station name {:?} collides with another station's output directory",
                    station.name
                )));
            }
        }

        let mut ids = BTreeSet::new();
        let mut satellite_files = BTreeSet::new();
        for config in &self.satellites {
            let id = sanitize_id(&config.id);
            if !id.is_empty() && !ids.insert(id.clone()) {
                return Err(AnalyzerError::Configuration(format!("duplicate satellite id {}", id)));
            }
            let stem = file_stem(&satellite_name(config));
            if !stem.is_empty() && !satellite_files.insert(stem) {
                return Err(AnalyzerError::Configuration(format!(
                    "satellite {} name collides with another satellite's output files",
                    id
                )));
            }
        }

        let mut satellites = Vec::with_capacity(self.satellites.len());
        let mut rejected = Vec::new();
        for config in &self.satellites {
            match build_satellite(config, &registry, &self.stations) {
                Ok(satellite) => satellites.push(satellite),
                Err(e) => {
                    warn!(satellite = %config.id, "Not scheduled: {}", e);
                    let id = sanitize_id(&config.id);
                    rejected.push(BatchEntry {
                        satellite: if id.is_empty() { config.id.clone() } else { id },
                        outcome: TaskOutcome::from_error(&e),
                    });
                },
            }
        }

        let context = AnalysisContext::default()
            .with_initial_pass(self.initial_pass)
            .with_end_of_run(self.end_of_run);
        Ok(Scenario {
            context,
            stations: registry,
            satellites,
            rejected,
            output_dir: self.output_dir.clone(),
            workers: self.workers,
        })
    }
}

/// Output name of a satellite: its name, else its sanitized id
fn satellite_name(config: &SatelliteConfig) -> String {
    config.name.clone().unwrap_or_else(|| sanitize_id(&config.id))
}

fn checked_id(kind: &str, raw: &str) -> Result<String> {
    let id = sanitize_id(raw);
    if id.is_empty() {
        return Err(AnalyzerError::Configuration(format!("{} id {:?} is empty", kind, raw)));
    }
    if id != raw {
        warn!("{} id {:?} sanitized to {:?}", kind, raw, id);
    }
    Ok(id)
}

fn build_station(config: &StationConfig) -> Result<GroundStation> {
    let id = checked_id("station", &config.id)?;
    if !is_valid_latitude(config.latitude) || !is_valid_longitude(config.longitude) {
        return Err(AnalyzerError::Configuration(format!(
            "station {} at ({}, {}) is outside valid coordinates",
            id, config.latitude, config.longitude
        )));
    }
    if !config.altitude_m.is_finite() {
        return Err(AnalyzerError::Configuration(format!("station {} altitude is not finite", id)));
    }
    config.detector.validate().map_err(|e| {
        AnalyzerError::Configuration(format!("station {}: {}", id, e))
    })?;

    let name = config.name.clone().unwrap_or_else(|| id.clone());
    if file_stem(&name).is_empty() {
        return Err(AnalyzerError::Configuration(format!(
            "station {} name {:?} is not usable as a directory name",
            id, name
        )));
    }
    let location = GeoLocation {
        latitude: config.latitude,
        longitude: config.longitude,
        altitude_m: config.altitude_m,
    };
    Ok(GroundStation::new(id, name, location, &Wgs84FrameProvider)?)
}

fn build_trajectory(id: &str, config: &TrajectoryConfig) -> Result<(Arc<dyn TrajectorySource>, DateTime<Utc>)> {
    let trajectory_error = |source: OrbitalError| AnalyzerError::Trajectory {
        satellite: id.to_string(),
        source,
    };
    match config {
        TrajectoryConfig::Tle { line1, line2 } => {
            let source = Sgp4Source::from_tle(line1, line2).map_err(trajectory_error)?;
            let epoch = source.epoch();
            Ok((Arc::new(source), epoch))
        },
        TrajectoryConfig::Keplerian {
            semi_major_axis_km,
            eccentricity,
            inclination_deg,
            raan_deg,
            arg_perigee_deg,
            mean_anomaly_deg,
            epoch,
        } => {
            let elements = KeplerianElements {
                semi_major_axis_km: *semi_major_axis_km,
                eccentricity: *eccentricity,
                inclination_deg: *inclination_deg,
                raan_deg: *raan_deg,
                arg_perigee_deg: *arg_perigee_deg,
                mean_anomaly_deg: *mean_anomaly_deg,
                epoch: *epoch,
            };
            let source = KeplerianSource::new(elements).map_err(trajectory_error)?;
            Ok((Arc::new(source), *epoch))
        },
    }
}

fn build_satellite(
    config: &SatelliteConfig,
    registry: &StationRegistry,
    stations: &[StationConfig],
) -> Result<Satellite> {
    let id = checked_id("satellite", &config.id)?;
    let name = satellite_name(config);
    if file_stem(&name).is_empty() {
        return Err(AnalyzerError::Configuration(format!(
            "satellite {} name {:?} is not usable as a file name",
            id, name
        )));
    }
    let (trajectory, epoch) = build_trajectory(&id, &config.trajectory)?;

    let start = config.start.unwrap_or(epoch);
    let window = match (config.end, config.duration_s) {
        (Some(end), None) => TimeWindow::new(start, end, config.step_s)?,
        (None, Some(duration_s)) => TimeWindow::with_duration(start, duration_s, config.step_s)?,
        (Some(_), Some(_)) => {
            return Err(AnalyzerError::Configuration(format!(
                "satellite {}: give either end or duration_s, not both",
                id
            )))
        },
        (None, None) => {
            return Err(AnalyzerError::Configuration(format!(
                "satellite {}: end or duration_s required",
                id
            )))
        },
    };

    let mut satellite = Satellite::new(id, name)
        .with_trajectory(trajectory)
        .with_window(window)
        .with_outputs(config.outputs);

    let selected: Vec<String> = match &config.stations {
        Some(ids) => ids.iter().map(|s| sanitize_id(s)).collect(),
        None => registry.iter().map(|s| s.id.clone()).collect(),
    };
    for station_id in selected {
        let station = registry.get(&station_id)?;
        let settings = stations
            .iter()
            .find(|s| sanitize_id(&s.id) == station_id)
            .map(|s| s.detector)
            .unwrap_or_default();
        satellite.register_station(station, settings)?;
    }

    satellite.validate()?;
    Ok(satellite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const ISS_TLE: (&str, &str) = (
        "1 25544U 98067A   21001.00000000  .00001264  00000-0  31081-4 0  9994",
        "2 25544  51.6442 147.0064 0001185 296.5627 201.3958 15.49237320262541",
    );

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_config_with_defaults() {
        let json = r#"{
            "stations": [
                {"id": "FR", "latitude": 47.6652, "longitude": 7.84965, "altitude_m": 325.036, "threshold_deg": 5.0}
            ],
            "satellites": [
                {"id": "SSO", "trajectory": {"type": "keplerian", "semi_major_axis_km": 7078.14,
                 "inclination_deg": 98.1929, "raan_deg": 10.5834, "epoch": "2021-01-01T00:00:00Z"},
                 "duration_s": 3600, "outputs": {"sun": false}}
            ]
        }"#;
        let file = write_config(json);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.initial_pass, InitialPassPolicy::OpenAtStart);
        assert_eq!(config.end_of_run, EndOfRunPolicy::Drop);
        assert_eq!(config.stations[0].detector.threshold_deg, 5.0);
        assert_eq!(config.stations[0].detector.max_check_s, 60.0);
        assert_eq!(config.satellites[0].step_s, 60.0);

        let scenario = config.build().unwrap();
        let sat = &scenario.satellites[0];
        assert_eq!(sat.name, "SSO");
        assert!(!sat.outputs().sun && sat.outputs().earth);
        assert_eq!(sat.stations().len(), 1);
        assert_eq!(sat.stations()[0].settings.threshold_deg, 5.0);
        let window = sat.window().unwrap();
        assert_eq!(window.start(), Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(window.duration_s(), 3600.0);
    }

    #[test]
    fn test_tle_satellite_starts_at_epoch() {
        let json = format!(
            r#"{{"satellites": [{{"id": "ISS", "trajectory": {{"type": "tle", "line1": "{}", "line2": "{}"}},
                "duration_s": 600, "step_s": 30}}],
               "end_of_run": "truncate", "initial_pass": "skip_partial"}}"#,
            ISS_TLE.0, ISS_TLE.1
        );
        let scenario = serde_json::from_str::<ScenarioConfig>(&json).unwrap().build().unwrap();
        assert_eq!(scenario.context.end_of_run, EndOfRunPolicy::Truncate);
        assert_eq!(scenario.context.initial_pass, InitialPassPolicy::SkipPartial);
        let window = scenario.satellites[0].window().unwrap();
        assert_eq!(window.start(), Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_rejects_bad_scenarios() {
        let mut config = example_scenario();
        config.stations[0].latitude = 95.0;
        assert!(matches!(config.build(), Err(AnalyzerError::Configuration(_))));

        let mut config = example_scenario();
        config.stations[0].detector.root_tolerance_s = 0.0;
        assert!(config.build().is_err());

        let mut config = example_scenario();
        config.satellites.push(config.satellites[0].clone());
        assert!(matches!(config.build(), Err(AnalyzerError::Configuration(_))));

        let mut config = example_scenario();
        config.workers = Some(0);
        assert!(config.build().is_err());
    }

    fn rejected_outcome(config: &ScenarioConfig) -> TaskOutcome {
        let scenario = config.build().unwrap();
        assert!(scenario.satellites.is_empty());
        assert_eq!(scenario.rejected.len(), 1);
        assert_eq!(scenario.rejected[0].satellite, "SSO-700");
        scenario.rejected[0].outcome.clone()
    }

    #[test]
    fn test_bad_satellites_are_rejected_individually() {
        let mut config = example_scenario();
        config.satellites[0].end = Some(Utc.with_ymd_and_hms(2021, 1, 2, 0, 0, 0).unwrap());
        assert!(matches!(rejected_outcome(&config), TaskOutcome::Refused(_)));

        let mut config = example_scenario();
        config.satellites[0].duration_s = None;
        assert!(matches!(rejected_outcome(&config), TaskOutcome::Refused(_)));

        let mut config = example_scenario();
        config.satellites[0].step_s = 0.0;
        assert!(matches!(rejected_outcome(&config), TaskOutcome::Refused(_)));

        let mut config = example_scenario();
        config.satellites[0].stations = Some(vec!["Nowhere".into()]);
        assert!(matches!(rejected_outcome(&config), TaskOutcome::Refused(m) if m.contains("Nowhere")));

        let mut config = example_scenario();
        config.satellites[0].trajectory = TrajectoryConfig::Tle {
            line1: "garbage".into(),
            line2: "garbage".into(),
        };
        assert!(matches!(rejected_outcome(&config), TaskOutcome::Failed(_)));
    }

    #[test]
    fn test_good_satellite_survives_bad_sibling() {
        let mut config = example_scenario();
        let mut bad = config.satellites[0].clone();
        bad.id = "BAD".into();
        bad.name = None;
        bad.trajectory = TrajectoryConfig::Tle {
            line1: "garbage".into(),
            line2: "garbage".into(),
        };
        config.satellites.push(bad);

        let scenario = config.build().unwrap();
        assert_eq!(scenario.satellites.len(), 1);
        assert_eq!(scenario.satellites[0].id, "SSO-700");
        assert_eq!(scenario.rejected.len(), 1);
        assert_eq!(scenario.rejected[0].satellite, "BAD");
        assert!(matches!(&scenario.rejected[0].outcome, TaskOutcome::Failed(m) if m.contains("BAD")));
    }

    #[test]
    fn test_output_names_must_not_collide() {
        // different names, same path-safe stem
        let mut config = example_scenario();
        let mut other = config.satellites[0].clone();
        other.id = "SSO-701".into();
        other.name = Some("ERNST?".into());
        config.satellites[0].name = Some("ERNST!".into());
        config.satellites.push(other);
        assert!(matches!(config.build(), Err(AnalyzerError::Configuration(_))));

        let mut config = example_scenario();
        let mut other = config.stations[0].clone();
        other.id = "FR2".into();
        config.stations.push(other);
        assert!(matches!(config.build(), Err(AnalyzerError::Configuration(_))));

        // distinct names are fine, and ids stand in for missing names
        let mut config = example_scenario();
        let mut other = config.satellites[0].clone();
        other.id = "SSO-701".into();
        other.name = None;
        config.satellites.push(other);
        let scenario = config.build().unwrap();
        let names: Vec<&str> = scenario.satellites.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["ERNST", "SSO-701"]);
    }

    #[test]
    fn test_ids_are_sanitized() {
        let mut config = example_scenario();
        config.satellites[0].id = "../SSO 700".into();
        let scenario = config.build().unwrap();
        assert_eq!(scenario.satellites[0].id, "SSO700");

        let mut config = example_scenario();
        config.stations[0].id = "///".into();
        assert!(config.build().is_err());
    }

    #[test]
    fn test_example_scenario() {
        let scenario = example_scenario().build().unwrap();
        assert_eq!(scenario.satellites.len(), 1);
        assert!(scenario.rejected.is_empty());
        assert_eq!(scenario.stations.len(), 1);
        let satellite = &scenario.satellites[0];
        assert_eq!(satellite.name, "ERNST");
        assert_eq!(satellite.stations()[0].station.name, "Freiburg");
        let window = satellite.window().unwrap();
        assert_eq!(window.duration_s(), 604_800.0);
        assert_eq!(window.step_s(), 60.0);
    }

    #[test]
    fn test_malformed_json() {
        let file = write_config("{ not json");
        assert!(matches!(load_config(file.path()), Err(AnalyzerError::Json(_))));
        assert!(matches!(
            load_config("/definitely/not/here.json"),
            Err(AnalyzerError::Io(_))
        ));
    }
}
