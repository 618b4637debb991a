//! Orbital Mechanics Library
//!
//! Trajectory sources (SGP4 from TLEs, two-body Keplerian), Earth frame
//! transforms and a low-precision solar ephemeris. Positions are expressed in
//! kilometres, velocities in kilometres per second.

use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrbitalError {
    #[error("Invalid TLE format: {0}")]
    InvalidTle(String),
    #[error("Propagation failed for {satellite} at {epoch}: {reason}")]
    PropagationFailed {
        satellite: String,
        epoch: DateTime<Utc>,
        reason: String,
    },
    #[error("{satellite}: epoch {epoch} outside of trajectory span [{start}, {end}]")]
    OutOfSpan {
        satellite: String,
        epoch: DateTime<Utc>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("Invalid orbital elements: {0}")]
    InvalidElements(String),
    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),
}

pub type Result<T> = std::result::Result<T, OrbitalError>;

/// Inertial position/velocity of a satellite at one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateVector {
    pub epoch: DateTime<Utc>,
    /// Earth-centred inertial position [km]
    pub position: Vector3<f64>,
    /// Earth-centred inertial velocity [km/s]
    pub velocity: Vector3<f64>,
}

impl StateVector {
    pub fn new(epoch: DateTime<Utc>, position: Vector3<f64>, velocity: Vector3<f64>) -> Self {
        Self {
            epoch,
            position,
            velocity,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.iter().chain(self.velocity.iter()).all(|v| v.is_finite())
    }
}

/// Anything able to produce the inertial state of a satellite.
///
/// Implementations are shared read-only between worker threads.
pub trait TrajectorySource: Send + Sync {
    /// Inertial state of `satellite_id` at `epoch`, or an error when the
    /// source cannot resolve it (decayed orbit, epoch outside its span, ...).
    fn state(&self, satellite_id: &str, epoch: DateTime<Utc>) -> Result<StateVector>;
}

/// Optional validity window of a trajectory source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Span {
    pub fn check(&self, satellite_id: &str, epoch: DateTime<Utc>) -> Result<()> {
        if epoch < self.start || epoch > self.end {
            return Err(OrbitalError::OutOfSpan {
                satellite: satellite_id.to_string(),
                epoch,
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}

pub mod time {
    use chrono::{DateTime, Utc};

    const UNIX_EPOCH_JD: f64 = 2_440_587.5;
    const J2000_JD: f64 = 2_451_545.0;
    const SECONDS_PER_DAY: f64 = 86_400.0;

    /// Julian date (UTC used as UT1/TT approximation)
    pub fn julian_date(epoch: DateTime<Utc>) -> f64 {
        let seconds = epoch.timestamp() as f64 + epoch.timestamp_subsec_nanos() as f64 / 1.0e9;
        UNIX_EPOCH_JD + seconds / SECONDS_PER_DAY
    }

    /// Days elapsed since J2000.0
    pub fn days_since_j2000(epoch: DateTime<Utc>) -> f64 {
        julian_date(epoch) - J2000_JD
    }

    /// Julian centuries elapsed since J2000.0
    pub fn centuries_since_j2000(epoch: DateTime<Utc>) -> f64 {
        days_since_j2000(epoch) / 36_525.0
    }

    /// Seconds from `from` to `to`, with nanosecond resolution
    pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
        let delta = to.signed_duration_since(from);
        match delta.num_nanoseconds() {
            Some(ns) => ns as f64 / 1.0e9,
            None => delta.num_milliseconds() as f64 / 1.0e3,
        }
    }

    /// `epoch` shifted by a (possibly fractional) number of seconds, rounded to the nanosecond
    pub fn shifted_by(epoch: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
        epoch + chrono::Duration::nanoseconds((seconds * 1.0e9).round() as i64)
    }
}

pub mod propagation {
    use super::*;

    const MINUTES_PER_SECOND: f64 = 1.0 / 60.0;

    /// SGP4 propagation from a two-line element set.
    ///
    /// The constants are derived once at construction, so propagating a
    /// long batch only pays for the model evaluation.
    pub struct Sgp4Source {
        epoch: DateTime<Utc>,
        constants: sgp4::Constants,
        span: Option<Span>,
    }

    impl Sgp4Source {
        pub fn from_tle(tle_line1: &str, tle_line2: &str) -> Result<Self> {
            let elements = sgp4::Elements::from_tle(
                None,
                tle_line1.as_bytes(),
                tle_line2.as_bytes(),
            ).map_err(|e| OrbitalError::InvalidTle(format!("{:?}", e)))?;

            let constants = sgp4::Constants::from_elements(&elements)
                .map_err(|e| OrbitalError::InvalidTle(format!("{:?}", e)))?;

            let epoch = DateTime::<Utc>::from_naive_utc_and_offset(elements.datetime, Utc);

            Ok(Self {
                epoch,
                constants,
                span: None,
            })
        }

        /// Restrict the epochs this source answers for
        pub fn with_span(mut self, span: Span) -> Self {
            self.span = Some(span);
            self
        }

        /// TLE reference epoch
        pub fn epoch(&self) -> DateTime<Utc> {
            self.epoch
        }
    }

    impl TrajectorySource for Sgp4Source {
        fn state(&self, satellite_id: &str, epoch: DateTime<Utc>) -> Result<StateVector> {
            if let Some(span) = &self.span {
                span.check(satellite_id, epoch)?;
            }
            let minutes_since_epoch = time::seconds_between(self.epoch, epoch) * MINUTES_PER_SECOND;

            let prediction = self.constants.propagate(minutes_since_epoch)
                .map_err(|e| OrbitalError::PropagationFailed {
                    satellite: satellite_id.to_string(),
                    epoch,
                    reason: format!("{:?}", e),
                })?;

            Ok(StateVector {
                epoch,
                position: Vector3::from(prediction.position),
                velocity: Vector3::from(prediction.velocity),
            })
        }
    }

    /// Classical orbital elements at a reference epoch.
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct KeplerianElements {
        /// Semi-major axis [km]
        pub semi_major_axis_km: f64,
        pub eccentricity: f64,
        pub inclination_deg: f64,
        pub raan_deg: f64,
        pub arg_perigee_deg: f64,
        pub mean_anomaly_deg: f64,
        pub epoch: DateTime<Utc>,
    }

    impl KeplerianElements {
        /// Circular orbit at `altitude_km` above the equatorial radius
        pub fn circular(
            altitude_km: f64,
            inclination_deg: f64,
            raan_deg: f64,
            epoch: DateTime<Utc>,
        ) -> Self {
            Self {
                semi_major_axis_km: constants::EARTH_RADIUS_KM + altitude_km,
                eccentricity: 0.0,
                inclination_deg,
                raan_deg,
                arg_perigee_deg: 0.0,
                mean_anomaly_deg: 0.0,
                epoch,
            }
        }

        /// Mean motion [rad/s]
        pub fn mean_motion(&self) -> f64 {
            (constants::MU_EARTH_KM3_S2 / self.semi_major_axis_km.powi(3)).sqrt()
        }

        /// Orbital period [s]
        pub fn period_s(&self) -> f64 {
            2.0 * std::f64::consts::PI / self.mean_motion()
        }
    }

    /// Unperturbed two-body propagation.
    #[derive(Debug, Clone)]
    pub struct KeplerianSource {
        elements: KeplerianElements,
        span: Option<Span>,
    }

    impl KeplerianSource {
        pub fn new(elements: KeplerianElements) -> Result<Self> {
            let e = elements.eccentricity;
            if !(0.0..1.0).contains(&e) {
                return Err(OrbitalError::InvalidElements(format!(
                    "eccentricity {} outside [0, 1)",
                    e
                )));
            }
            if !(elements.semi_major_axis_km.is_finite() && elements.semi_major_axis_km > 0.0) {
                return Err(OrbitalError::InvalidElements(format!(
                    "semi-major axis {} km",
                    elements.semi_major_axis_km
                )));
            }
            Ok(Self {
                elements,
                span: None,
            })
        }

        pub fn with_span(mut self, span: Span) -> Self {
            self.span = Some(span);
            self
        }

        pub fn elements(&self) -> &KeplerianElements {
            &self.elements
        }
    }

    /// Newton iteration on Kepler's equation `E - e sin E = M`
    fn eccentric_anomaly(mean_anomaly: f64, e: f64) -> f64 {
        let mut ecc = if e < 0.8 { mean_anomaly } else { std::f64::consts::PI };
        for _ in 0..50 {
            let delta = (ecc - e * ecc.sin() - mean_anomaly) / (1.0 - e * ecc.cos());
            ecc -= delta;
            if delta.abs() < 1.0e-14 {
                break;
            }
        }
        ecc
    }

    impl TrajectorySource for KeplerianSource {
        fn state(&self, satellite_id: &str, epoch: DateTime<Utc>) -> Result<StateVector> {
            if let Some(span) = &self.span {
                span.check(satellite_id, epoch)?;
            }
            let el = &self.elements;
            let a = el.semi_major_axis_km;
            let e = el.eccentricity;
            let dt = time::seconds_between(el.epoch, epoch);

            let mean_anomaly = (el.mean_anomaly_deg.to_radians() + el.mean_motion() * dt)
                .rem_euclid(2.0 * std::f64::consts::PI);
            let ecc = eccentric_anomaly(mean_anomaly, e);
            let (sin_e, cos_e) = ecc.sin_cos();
            let root = (1.0 - e * e).sqrt();
            let radius = a * (1.0 - e * cos_e);

            // Perifocal (PQW) coordinates
            let r_pqw = Vector3::new(a * (cos_e - e), a * root * sin_e, 0.0);
            let v_scale = (constants::MU_EARTH_KM3_S2 * a).sqrt() / radius;
            let v_pqw = Vector3::new(-v_scale * sin_e, v_scale * root * cos_e, 0.0);

            let rotation = transforms::perifocal_to_inertial(
                el.raan_deg.to_radians(),
                el.inclination_deg.to_radians(),
                el.arg_perigee_deg.to_radians(),
            );

            let state = StateVector::new(epoch, rotation * r_pqw, rotation * v_pqw);
            if !state.is_finite() {
                return Err(OrbitalError::PropagationFailed {
                    satellite: satellite_id.to_string(),
                    epoch,
                    reason: "non finite state".to_string(),
                });
            }
            Ok(state)
        }
    }
}

pub mod constants {
    /// WGS-84 equatorial radius [km]
    pub const EARTH_RADIUS_KM: f64 = 6378.137;
    /// WGS-84 flattening
    pub const EARTH_FLATTENING: f64 = 1.0 / 298.257223563;
    /// Earth gravitational parameter [km³/s²]
    pub const MU_EARTH_KM3_S2: f64 = 398_600.4415;
    /// Astronomical unit [km]
    pub const AU_KM: f64 = 149_597_870.7;
}

pub mod transforms {
    use super::*;
    use nalgebra::Matrix3;

    use crate::constants::{EARTH_FLATTENING, EARTH_RADIUS_KM};

    /// Greenwich mean sidereal time [rad] (IAU-82)
    pub fn gmst(epoch: DateTime<Utc>) -> f64 {
        let t = time::centuries_since_j2000(epoch);
        let seconds = 67_310.548_41
            + (876_600.0 * 3600.0 + 8_640_184.812_866) * t
            + 0.093_104 * t * t
            - 6.2e-6 * t * t * t;
        // 240 seconds of time per degree
        (seconds / 240.0).rem_euclid(360.0).to_radians()
    }

    /// Rotate an inertial vector into the Earth-fixed frame
    pub fn eci_to_ecef(eci: &Vector3<f64>, gmst_rad: f64) -> Vector3<f64> {
        let (sin_g, cos_g) = gmst_rad.sin_cos();
        Vector3::new(
            cos_g * eci.x + sin_g * eci.y,
            -sin_g * eci.x + cos_g * eci.y,
            eci.z,
        )
    }

    /// Rotate an Earth-fixed vector into the inertial frame
    pub fn ecef_to_eci(ecef: &Vector3<f64>, gmst_rad: f64) -> Vector3<f64> {
        eci_to_ecef(ecef, -gmst_rad)
    }

    /// WGS-84 geodetic coordinates to ECEF [km]
    pub fn geodetic_to_ecef(
        latitude_deg: f64,
        longitude_deg: f64,
        altitude_km: f64,
    ) -> Result<Vector3<f64>> {
        if !(latitude_deg.is_finite() && longitude_deg.is_finite() && altitude_km.is_finite()) {
            return Err(OrbitalError::InvalidCoordinates(format!(
                "({}, {}, {})",
                latitude_deg, longitude_deg, altitude_km
            )));
        }
        if !(-90.0..=90.0).contains(&latitude_deg) {
            return Err(OrbitalError::InvalidCoordinates(format!(
                "latitude {} outside [-90, 90]",
                latitude_deg
            )));
        }
        let lat = latitude_deg.to_radians();
        let lon = longitude_deg.to_radians();
        let e2 = 2.0 * EARTH_FLATTENING - EARTH_FLATTENING * EARTH_FLATTENING;

        // Radius of curvature in prime vertical
        let n = EARTH_RADIUS_KM / (1.0 - e2 * lat.sin().powi(2)).sqrt();

        Ok(Vector3::new(
            (n + altitude_km) * lat.cos() * lon.cos(),
            (n + altitude_km) * lat.cos() * lon.sin(),
            (n * (1.0 - e2) + altitude_km) * lat.sin(),
        ))
    }

    /// Rows are the East, North and Up unit vectors expressed in ECEF
    #[rustfmt::skip]
    pub fn ecef_to_enu_rotation(latitude_deg: f64, longitude_deg: f64) -> Matrix3<f64> {
        let (sin_lat, cos_lat) = latitude_deg.to_radians().sin_cos();
        let (sin_lon, cos_lon) = longitude_deg.to_radians().sin_cos();
        Matrix3::new(
            -sin_lon, cos_lon, 0.0,
            -sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat,
            cos_lat * cos_lon, cos_lat * sin_lon, sin_lat,
        )
    }

    /// R3(-raan) · R1(-i) · R3(-argp)
    #[rustfmt::skip]
    pub fn perifocal_to_inertial(raan: f64, inclination: f64, arg_perigee: f64) -> Matrix3<f64> {
        let (so, co) = raan.sin_cos();
        let (si, ci) = inclination.sin_cos();
        let (sw, cw) = arg_perigee.sin_cos();
        Matrix3::new(
            co * cw - so * sw * ci, -co * sw - so * cw * ci, so * si,
            so * cw + co * sw * ci, -so * sw + co * cw * ci, -co * si,
            sw * si, cw * si, ci,
        )
    }
}

pub mod ephemeris {
    use super::*;

    use crate::constants::AU_KM;

    /// Position of the Sun as seen from the Earth's centre.
    pub trait SolarEphemeris: Send + Sync {
        /// Earth→Sun vector in the inertial frame [km]
        fn sun_position_eci(&self, epoch: DateTime<Utc>) -> Vector3<f64>;
    }

    /// Astronomical Almanac low precision solar coordinates
    /// (about 0.01° over 1950-2050), mean equator and equinox of date.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct AnalyticSun;

    impl SolarEphemeris for AnalyticSun {
        fn sun_position_eci(&self, epoch: DateTime<Utc>) -> Vector3<f64> {
            let t = time::centuries_since_j2000(epoch);

            let mean_longitude = 280.460 + 36_000.771 * t;
            let mean_anomaly = (357.529_109_2 + 35_999.050_34 * t).to_radians();
            let ecliptic_longitude = (mean_longitude
                + 1.914_666_471 * mean_anomaly.sin()
                + 0.019_994_643 * (2.0 * mean_anomaly).sin())
            .to_radians();
            let distance_au = 1.000_140_612
                - 0.016_708_617 * mean_anomaly.cos()
                - 0.000_139_589 * (2.0 * mean_anomaly).cos();
            let obliquity = (23.439_291 - 0.013_004_2 * t).to_radians();

            let (sin_l, cos_l) = ecliptic_longitude.sin_cos();
            let r = distance_au * AU_KM;
            Vector3::new(
                r * cos_l,
                r * obliquity.cos() * sin_l,
                r * obliquity.sin() * sin_l,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ephemeris::{AnalyticSun, SolarEphemeris};
    use crate::propagation::{KeplerianElements, KeplerianSource};
    use chrono::TimeZone;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_circular_orbit_radius_and_speed() {
        let elements = KeplerianElements::circular(700.0, 98.1929, 10.5834, epoch());
        let source = KeplerianSource::new(elements).unwrap();
        let expected_speed = (constants::MU_EARTH_KM3_S2 / elements.semi_major_axis_km).sqrt();

        for minutes in [0, 17, 45, 90, 600] {
            let t = epoch() + chrono::Duration::minutes(minutes);
            let state = source.state("SAT", t).unwrap();
            assert!((state.position.norm() - elements.semi_major_axis_km).abs() < 1e-6);
            assert!((state.velocity.norm() - expected_speed).abs() < 1e-9);
            // circular: velocity orthogonal to radius
            assert!(state.position.dot(&state.velocity).abs() < 1e-5);
        }
    }

    #[test]
    fn test_keplerian_period_closes_orbit() {
        let elements = KeplerianElements {
            semi_major_axis_km: 7500.0,
            eccentricity: 0.1,
            inclination_deg: 51.6,
            raan_deg: 30.0,
            arg_perigee_deg: 45.0,
            mean_anomaly_deg: 10.0,
            epoch: epoch(),
        };
        let source = KeplerianSource::new(elements).unwrap();
        let start = source.state("SAT", epoch()).unwrap();
        let later = source
            .state("SAT", time::shifted_by(epoch(), elements.period_s()))
            .unwrap();
        assert!((start.position - later.position).norm() < 1e-3);
    }

    #[test]
    fn test_rejects_hyperbolic_elements() {
        let mut elements = KeplerianElements::circular(700.0, 0.0, 0.0, epoch());
        elements.eccentricity = 1.2;
        assert!(KeplerianSource::new(elements).is_err());
    }

    #[test]
    fn test_span_is_enforced() {
        let elements = KeplerianElements::circular(700.0, 0.0, 0.0, epoch());
        let span = Span {
            start: epoch(),
            end: epoch() + chrono::Duration::hours(1),
        };
        let source = KeplerianSource::new(elements).unwrap().with_span(span);
        assert!(source.state("SAT", epoch() + chrono::Duration::minutes(30)).is_ok());
        let err = source
            .state("SAT", epoch() + chrono::Duration::hours(2))
            .unwrap_err();
        assert!(matches!(err, OrbitalError::OutOfSpan { .. }));
    }

    #[test]
    fn test_gmst_reference_value() {
        // Vallado example 3-5: 1992-08-20 12:14 UT1 -> 152.578787886°
        let t = Utc.with_ymd_and_hms(1992, 8, 20, 12, 14, 0).unwrap();
        let gmst_deg = transforms::gmst(t).to_degrees();
        assert!((gmst_deg - 152.578_787_886).abs() < 0.01, "gmst {}", gmst_deg);
    }

    #[test]
    fn test_seconds_between_whole_seconds_are_exact() {
        let t0 = epoch();
        for seconds in [1, 15, 30, 61, 523, 86_400] {
            let t1 = t0 + chrono::Duration::seconds(seconds);
            assert_eq!(time::seconds_between(t0, t1), seconds as f64);
        }
        let t1 = t0 + chrono::Duration::milliseconds(1_500);
        assert_eq!(time::seconds_between(t0, t1), 1.5);
        assert_eq!(time::seconds_between(t1, t0), -1.5);
    }

    #[test]
    fn test_eci_ecef_roundtrip() {
        let v = Vector3::new(7000.0, -1200.0, 300.0);
        let g = 1.234;
        let back = transforms::ecef_to_eci(&transforms::eci_to_ecef(&v, g), g);
        assert!((back - v).norm() < 1e-9);
    }

    #[test]
    fn test_geodetic_to_ecef_equator_and_pole() {
        let eq = transforms::geodetic_to_ecef(0.0, 0.0, 0.0).unwrap();
        assert!((eq.x - constants::EARTH_RADIUS_KM).abs() < 1e-9);
        let pole = transforms::geodetic_to_ecef(90.0, 0.0, 0.0).unwrap();
        // WGS-84 polar radius
        assert!((pole.z - 6356.752).abs() < 1e-3);
        assert!(transforms::geodetic_to_ecef(91.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_sun_distance_and_season() {
        let sun = AnalyticSun;
        // early January: perihelion, ecliptic longitude ~280°
        let jan = sun.sun_position_eci(epoch());
        assert!((jan.norm() / constants::AU_KM - 0.983).abs() < 0.002);
        assert!(jan.z < 0.0, "sun south of the equator in january");
        // june solstice: declination ~ +23.4°
        let june = sun.sun_position_eci(Utc.with_ymd_and_hms(2021, 6, 21, 4, 0, 0).unwrap());
        let declination = (june.z / june.norm()).asin().to_degrees();
        assert!((declination - 23.44).abs() < 0.1, "declination {}", declination);
    }
}
