//! Output sinks for access windows and angle samples
//!
//! Every task opens its own sink through a shared [`SinkFactory`], so no
//! writer is ever touched by two threads.
//!
//! CSV layout under the output root:
//!
//! ```text
//! AccessTimes/<station-name>/<satellite-name>.csv   Access,StartTimeUTC,StopTimeUTC,DurationSeconds
//! SunAngles/<satellite-name>.csv                    TimeUTC,Azimuth(deg),Elevation(deg),Subsolar(deg)
//! EarthAngles/<satellite-name>.csv                  TimeUTC,Azimuth(deg),Elevation(deg)
//! ```
//!
//! Names pass through [`file_stem`]; the configuration layer keeps the
//! resulting stems unique.

use chrono::{DateTime, Utc};
use csv::Writer;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::accumulator::AccessWindow;
use crate::angles::{EarthAngleSample, SunAngleSample};
use crate::satellite::{OutputSwitches, Satellite};
use crate::Result;

pub const ACCESS_HEADER: [&str; 4] = ["Access", "StartTimeUTC", "StopTimeUTC", "DurationSeconds"];
pub const SUN_HEADER: [&str; 4] = ["TimeUTC", "Azimuth(deg)", "Elevation(deg)", "Subsolar(deg)"];
pub const EARTH_HEADER: [&str; 3] = ["TimeUTC", "Azimuth(deg)", "Elevation(deg)"];

/// Destination of one satellite's products.
///
/// Products the sink was not opened for are silently ignored.
pub trait OutputSink: Send {
    fn write_window(&mut self, window: &AccessWindow) -> Result<()>;
    fn write_sun(&mut self, sample: &SunAngleSample) -> Result<()>;
    fn write_earth(&mut self, sample: &EarthAngleSample) -> Result<()>;
    /// Flush and release. Called on success and after a mid-run failure.
    fn close(&mut self) -> Result<()>;
}

/// Opens one sink per satellite run
pub trait SinkFactory: Send + Sync {
    type Sink: OutputSink;

    fn open(&self, satellite: &Satellite) -> Result<Self::Sink>;
}

/// `1 Jan 2021 00:00:00.000`
pub fn format_epoch(epoch: DateTime<Utc>) -> String {
    epoch.format("%-d %b %Y %H:%M:%S%.3f").to_string()
}

/// Zero-padded fixed-point with three decimals (`007.500`, `-01.250`)
pub fn format_value(value: f64) -> String {
    format!("{:07.3}", value)
}

/// Like [`format_value`], for an azimuth in `[0, 360)`: a value that would
/// print as `360.000` wraps to `000.000`.
pub fn format_azimuth(value: f64) -> String {
    let formatted = format_value(value);
    if formatted == "360.000" {
        format_value(0.0)
    } else {
        formatted
    }
}

/// Path-safe version of a name
pub fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

// ============================================================================
// CSV
// ============================================================================

/// Writes CSV files below `root`, creating directories on demand.
///
/// Files are named after station and satellite names; windows are routed to
/// their file by station id.
#[derive(Debug, Clone)]
pub struct CsvSinkFactory {
    root: PathBuf,
}

impl CsvSinkFactory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn access_path(&self, station_name: &str, satellite_name: &str) -> PathBuf {
        self.root
            .join("AccessTimes")
            .join(file_stem(station_name))
            .join(format!("{}.csv", file_stem(satellite_name)))
    }

    pub fn sun_path(&self, satellite_name: &str) -> PathBuf {
        self.root.join("SunAngles").join(format!("{}.csv", file_stem(satellite_name)))
    }

    pub fn earth_path(&self, satellite_name: &str) -> PathBuf {
        self.root.join("EarthAngles").join(format!("{}.csv", file_stem(satellite_name)))
    }
}

fn start_csv(path: &Path, header: &[&str]) -> Result<Writer<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut wtr = Writer::from_path(path)?;
    wtr.write_record(header)?;
    debug!("Opened {:?}", path);
    Ok(wtr)
}

impl SinkFactory for CsvSinkFactory {
    type Sink = CsvSink;

    fn open(&self, satellite: &Satellite) -> Result<CsvSink> {
        let outputs = satellite.outputs();
        let sun = if outputs.sun {
            Some(start_csv(&self.sun_path(&satellite.name), &SUN_HEADER)?)
        } else {
            None
        };
        let earth = if outputs.earth {
            Some(start_csv(&self.earth_path(&satellite.name), &EARTH_HEADER)?)
        } else {
            None
        };
        let mut access = BTreeMap::new();
        if outputs.access {
            for link in satellite.stations() {
                let path = self.access_path(&link.station.name, &satellite.name);
                access.insert(link.station.id.clone(), start_csv(&path, &ACCESS_HEADER)?);
            }
        }
        Ok(CsvSink { sun, earth, access })
    }
}

pub struct CsvSink {
    sun: Option<Writer<File>>,
    earth: Option<Writer<File>>,
    access: BTreeMap<String, Writer<File>>,
}

impl OutputSink for CsvSink {
    fn write_window(&mut self, window: &AccessWindow) -> Result<()> {
        if let Some(wtr) = self.access.get_mut(&window.station_id) {
            wtr.write_record(&[
                window.sequence.to_string(),
                format_epoch(window.start),
                format_epoch(window.end),
                format_value(window.duration_s),
            ])?;
        }
        Ok(())
    }

    fn write_sun(&mut self, sample: &SunAngleSample) -> Result<()> {
        if let Some(wtr) = self.sun.as_mut() {
            wtr.write_record(&[
                format_epoch(sample.epoch),
                format_azimuth(sample.azimuth_deg),
                format_value(sample.elevation_deg),
                format_value(sample.subsolar_deg),
            ])?;
        }
        Ok(())
    }

    fn write_earth(&mut self, sample: &EarthAngleSample) -> Result<()> {
        if let Some(wtr) = self.earth.as_mut() {
            wtr.write_record(&[
                format_epoch(sample.epoch),
                format_azimuth(sample.azimuth_deg),
                format_value(sample.elevation_deg),
            ])?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        for mut wtr in self.sun.take().into_iter().chain(self.earth.take()) {
            wtr.flush()?;
        }
        for (_, mut wtr) in std::mem::take(&mut self.access) {
            wtr.flush()?;
        }
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Everything one satellite run produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SatelliteOutput {
    pub windows: Vec<AccessWindow>,
    pub sun: Vec<SunAngleSample>,
    pub earth: Vec<EarthAngleSample>,
    pub closed: bool,
}

impl SatelliteOutput {
    pub fn windows_for(&self, station_id: &str) -> Vec<&AccessWindow> {
        self.windows.iter().filter(|w| w.station_id == station_id).collect()
    }
}

/// Collects products in memory, keyed by satellite id.
#[derive(Debug, Clone, Default)]
pub struct MemorySinkFactory {
    outputs: Arc<Mutex<BTreeMap<String, SatelliteOutput>>>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output of a closed sink
    pub fn outputs(&self, satellite_id: &str) -> Option<SatelliteOutput> {
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(satellite_id)
            .cloned()
    }

    pub fn satellite_ids(&self) -> Vec<String> {
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl SinkFactory for MemorySinkFactory {
    type Sink = MemorySink;

    fn open(&self, satellite: &Satellite) -> Result<MemorySink> {
        Ok(MemorySink {
            satellite_id: satellite.id.clone(),
            switches: satellite.outputs(),
            buffer: SatelliteOutput::default(),
            shared: self.outputs.clone(),
        })
    }
}

/// Buffers locally and publishes to the factory on close.
pub struct MemorySink {
    satellite_id: String,
    switches: OutputSwitches,
    buffer: SatelliteOutput,
    shared: Arc<Mutex<BTreeMap<String, SatelliteOutput>>>,
}

impl OutputSink for MemorySink {
    fn write_window(&mut self, window: &AccessWindow) -> Result<()> {
        if self.switches.access {
            self.buffer.windows.push(window.clone());
        }
        Ok(())
    }

    fn write_sun(&mut self, sample: &SunAngleSample) -> Result<()> {
        if self.switches.sun {
            self.buffer.sun.push(*sample);
        }
        Ok(())
    }

    fn write_earth(&mut self, sample: &EarthAngleSample) -> Result<()> {
        if self.switches.earth {
            self.buffer.earth.push(*sample);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut output = std::mem::take(&mut self.buffer);
        output.closed = true;
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.satellite_id.clone(), output);
        Ok(())
    }
}
