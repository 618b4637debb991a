//! Ground Stations Library
//!
//! Ground station definitions, their WGS-84 topocentric (East-North-Up)
//! frames and look-angle computation toward an inertial satellite state.

use nalgebra::{Matrix3, Vector3};
use orbital_mechanics::{transforms, OrbitalError, StateVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StationError {
    #[error("Station not found: {0}")]
    NotFound(String),
    #[error("Duplicate station id: {0}")]
    Duplicate(String),
    #[error("Invalid location for {station}: {source}")]
    InvalidLocation {
        station: String,
        #[source]
        source: OrbitalError,
    },
}

pub type Result<T> = std::result::Result<T, StationError>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
}

/// Pointing angles from a station toward a target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LookAngles {
    pub azimuth_deg: f64,   // 0-360° from North, clockwise
    pub elevation_deg: f64, // -90..90° from the local horizontal plane
    pub range_km: f64,
}

/// Station-centred East-North-Up frame, fixed to the rotating Earth.
#[derive(Debug, Clone, PartialEq)]
pub struct StationFrame {
    origin_ecef: Vector3<f64>,
    ecef_to_enu: Matrix3<f64>,
}

impl StationFrame {
    pub fn origin_ecef(&self) -> &Vector3<f64> {
        &self.origin_ecef
    }

    /// Look angles toward an Earth-fixed position [km]
    pub fn look_angles_ecef(&self, target_ecef: &Vector3<f64>) -> LookAngles {
        let enu = self.ecef_to_enu * (target_ecef - self.origin_ecef);
        let (east, north, up) = (enu.x, enu.y, enu.z);

        let azimuth_deg = east.atan2(north).to_degrees();
        let azimuth_deg = if azimuth_deg < 0.0 { azimuth_deg + 360.0 } else { azimuth_deg };
        let horiz_range = (east * east + north * north).sqrt();

        LookAngles {
            azimuth_deg,
            elevation_deg: up.atan2(horiz_range).to_degrees(),
            range_km: enu.norm(),
        }
    }

    /// Look angles toward an inertial state, rotated by the sidereal angle of its epoch
    pub fn look_angles(&self, state: &StateVector) -> LookAngles {
        let gmst = transforms::gmst(state.epoch);
        self.look_angles_ecef(&transforms::eci_to_ecef(&state.position, gmst))
    }

    pub fn elevation_deg(&self, state: &StateVector) -> f64 {
        self.look_angles(state).elevation_deg
    }
}

/// Builds the topocentric frame of a geodetic location.
pub trait FrameProvider: Send + Sync {
    fn topocentric_frame(&self, location: &GeoLocation) -> std::result::Result<StationFrame, OrbitalError>;
}

/// WGS-84 ellipsoid frames, local vertical along the ellipsoid normal.
#[derive(Debug, Clone, Copy, Default)]
pub struct Wgs84FrameProvider;

impl FrameProvider for Wgs84FrameProvider {
    fn topocentric_frame(&self, location: &GeoLocation) -> std::result::Result<StationFrame, OrbitalError> {
        let origin_ecef = transforms::geodetic_to_ecef(
            location.latitude,
            location.longitude,
            location.altitude_m / 1000.0,
        )?;
        Ok(StationFrame {
            origin_ecef,
            ecef_to_enu: transforms::ecef_to_enu_rotation(location.latitude, location.longitude),
        })
    }
}

#[derive(Debug, Clone)]
pub struct GroundStation {
    pub id: String,
    pub name: String,
    pub location: GeoLocation,
    frame: StationFrame,
}

impl GroundStation {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        location: GeoLocation,
        provider: &dyn FrameProvider,
    ) -> Result<Self> {
        let id = id.into();
        let frame = provider
            .topocentric_frame(&location)
            .map_err(|source| StationError::InvalidLocation {
                station: id.clone(),
                source,
            })?;
        Ok(Self {
            id,
            name: name.into(),
            location,
            frame,
        })
    }

    pub fn frame(&self) -> &StationFrame {
        &self.frame
    }
}

/// Immutable-after-setup set of stations, shared between analysis tasks.
#[derive(Debug, Default)]
pub struct StationRegistry {
    stations: BTreeMap<String, Arc<GroundStation>>,
}

impl StationRegistry {
    pub fn new() -> Self {
        Self {
            stations: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, station: GroundStation) -> Result<Arc<GroundStation>> {
        if self.stations.contains_key(&station.id) {
            return Err(StationError::Duplicate(station.id));
        }
        let station = Arc::new(station);
        self.stations.insert(station.id.clone(), station.clone());
        Ok(station)
    }

    pub fn get(&self, id: &str) -> Result<Arc<GroundStation>> {
        self.stations
            .get(id)
            .cloned()
            .ok_or_else(|| StationError::NotFound(id.to_string()))
    }

    /// Stations ordered by id
    pub fn iter(&self) -> impl Iterator<Item = &Arc<GroundStation>> {
        self.stations.values()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}
