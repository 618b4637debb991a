//! Sun and Earth geometry in the satellite's local orbital frame
//!
//! The frame is VVLH:
//!
//! | Axis | Direction |
//! |------|-----------|
//! | `z`  | nadir, `-r/|r|` |
//! | `y`  | negative orbit normal, `-(r×v)/|r×v|` |
//! | `x`  | `y × z`, along-track |
//!
//! Azimuth is measured in the x–y plane from `x` toward `y`, elevation from
//! that plane toward `+z`.

use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use orbital_mechanics::ephemeris::SolarEphemeris;
use orbital_mechanics::StateVector;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{AnalyzerError, Result};

/// Relative magnitude below which a vector counts as zero
const DEGENERATE_RATIO: f64 = 1.0e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SunAngleSample {
    pub epoch: DateTime<Utc>,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    /// Angle between the Sun and the satellite seen from the Earth's centre
    pub subsolar_deg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EarthAngleSample {
    pub epoch: DateTime<Utc>,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
}

/// Orthonormal VVLH basis of one state, expressed in the inertial frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalOrbitalFrame {
    pub x: Vector3<f64>,
    pub y: Vector3<f64>,
    pub z: Vector3<f64>,
}

impl LocalOrbitalFrame {
    pub fn from_state(state: &StateVector) -> Result<Self> {
        if !state.is_finite() {
            return Err(AnalyzerError::Geometry(format!(
                "non-finite state at {}",
                state.epoch
            )));
        }
        let r = state.position;
        let v = state.velocity;
        let r_norm = r.norm();
        if r_norm == 0.0 {
            return Err(AnalyzerError::Geometry(format!(
                "zero position vector at {}",
                state.epoch
            )));
        }
        let h = r.cross(&v);
        let h_norm = h.norm();
        if h_norm <= DEGENERATE_RATIO * r_norm * v.norm() {
            return Err(AnalyzerError::Geometry(format!(
                "position parallel to velocity at {}",
                state.epoch
            )));
        }

        let z = -r / r_norm;
        let y = -h / h_norm;
        let x = y.cross(&z);
        Ok(Self { x, y, z })
    }

    /// Components of an inertial vector along the frame axes
    pub fn to_local(&self, d: &Vector3<f64>) -> Vector3<f64> {
        Vector3::new(self.x.dot(d), self.y.dot(d), self.z.dot(d))
    }

    /// Azimuth and elevation [deg] of an inertial direction
    pub fn azimuth_elevation(&self, d: &Vector3<f64>) -> (f64, f64) {
        azimuth_elevation(&self.to_local(d))
    }
}

/// Azimuth in [0, 360) and elevation in [-90, 90] of a frame-local vector.
///
/// A vector with no in-plane component gets azimuth 0 and elevation ±90.
pub fn azimuth_elevation(local: &Vector3<f64>) -> (f64, f64) {
    let in_plane = local.x.hypot(local.y);
    if in_plane <= DEGENERATE_RATIO * local.norm() {
        let elevation = if local.z > 0.0 { 90.0 } else { -90.0 };
        return (0.0, elevation);
    }
    let azimuth = normalize_degrees(local.y.atan2(local.x).to_degrees());
    let elevation = local.z.atan2(in_plane).to_degrees();
    (azimuth, elevation)
}

fn normalize_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid of a tiny negative value rounds up to 360.0
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Computes Sun and Earth look angles for a satellite state.
#[derive(Clone)]
pub struct AngleComputer {
    ephemeris: Arc<dyn SolarEphemeris>,
}

impl AngleComputer {
    pub fn new(ephemeris: Arc<dyn SolarEphemeris>) -> Self {
        Self { ephemeris }
    }

    pub fn compute(&self, state: &StateVector) -> Result<(SunAngleSample, EarthAngleSample)> {
        let frame = LocalOrbitalFrame::from_state(state)?;
        Ok((
            self.sun_in_frame(&frame, state)?,
            earth_in_frame(&frame, state),
        ))
    }

    pub fn sun_angles(&self, state: &StateVector) -> Result<SunAngleSample> {
        let frame = LocalOrbitalFrame::from_state(state)?;
        self.sun_in_frame(&frame, state)
    }

    pub fn earth_angles(&self, state: &StateVector) -> Result<EarthAngleSample> {
        let frame = LocalOrbitalFrame::from_state(state)?;
        Ok(earth_in_frame(&frame, state))
    }

    fn sun_in_frame(&self, frame: &LocalOrbitalFrame, state: &StateVector) -> Result<SunAngleSample> {
        let sun = self.ephemeris.sun_position_eci(state.epoch);
        if !sun.iter().all(|c| c.is_finite()) || sun.norm() == 0.0 {
            return Err(AnalyzerError::Geometry(format!(
                "invalid solar position at {}",
                state.epoch
            )));
        }
        let (azimuth_deg, elevation_deg) = frame.azimuth_elevation(&(sun - state.position));
        Ok(SunAngleSample {
            epoch: state.epoch,
            azimuth_deg,
            elevation_deg,
            subsolar_deg: sun.angle(&state.position).to_degrees(),
        })
    }
}

impl std::fmt::Debug for AngleComputer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AngleComputer").finish_non_exhaustive()
    }
}

fn earth_in_frame(frame: &LocalOrbitalFrame, state: &StateVector) -> EarthAngleSample {
    let (azimuth_deg, elevation_deg) = frame.azimuth_elevation(&(-state.position));
    EarthAngleSample {
        epoch: state.epoch,
        azimuth_deg,
        elevation_deg,
    }
}
