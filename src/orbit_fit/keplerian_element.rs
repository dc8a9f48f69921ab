//! # Keplerian orbital elements
//!
//! Classical elements of a heliocentric two-body orbit as returned by the orbit solver:
//!
//! 1. **a** – semi-major axis (AU)
//! 2. **e** – eccentricity (unitless)
//! 3. **i** – inclination (degrees)
//! 4. **Ω** – longitude of the ascending node (degrees)
//! 5. **ω** – argument of periapsis (degrees)
//! 6. **M** – mean anomaly at the reference epoch (degrees)
//!
//! The reference epoch is a julian date. Angles are stored in degrees because that is
//! the unit of the solver output and of the association file.
//!
//! ## Physical validity
//!
//! A converged solution only counts toward the confirmation of a trajectory when
//! [`KeplerianElements::is_physically_valid`] holds: every element finite, a bound orbit
//! with `0 ≤ e < max_eccentricity` and `0 < a ≤ max_semi_major_axis`.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{Degree, JD};

/// Keplerian orbital elements
/// Units:
/// * `reference_epoch`: JD
/// * `semi_major_axis`: AU
/// * `eccentricity`: unitless
/// * `inclination`: degrees
/// * `ascending_node_longitude`: degrees
/// * `periapsis_argument`: degrees
/// * `mean_anomaly`: degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeplerianElements {
    pub reference_epoch: JD,
    pub semi_major_axis: f64,
    pub eccentricity: f64,
    pub inclination: Degree,
    pub ascending_node_longitude: Degree,
    pub periapsis_argument: Degree,
    pub mean_anomaly: Degree,
}

/// Reduce an angle into `[0, 360)` degrees.
#[inline]
pub fn principal_angle_deg(angle: Degree) -> Degree {
    angle.rem_euclid(360.0)
}

impl KeplerianElements {
    /// Whether the elements describe a usable bound orbit.
    ///
    /// Arguments
    /// ---------
    /// * `max_eccentricity`: exclusive upper bound on `e`
    /// * `max_semi_major_axis`: inclusive upper bound on `a` (AU)
    pub fn is_physically_valid(&self, max_eccentricity: f64, max_semi_major_axis: f64) -> bool {
        let finite = [
            self.reference_epoch,
            self.semi_major_axis,
            self.eccentricity,
            self.inclination,
            self.ascending_node_longitude,
            self.periapsis_argument,
            self.mean_anomaly,
        ]
        .iter()
        .all(|v| v.is_finite());

        finite
            && self.eccentricity >= 0.0
            && self.eccentricity < max_eccentricity
            && self.semi_major_axis > 0.0
            && self.semi_major_axis <= max_semi_major_axis
            && (0.0..=180.0).contains(&self.inclination)
    }

    /// Perihelion distance `q = a (1 - e)` (AU).
    pub fn perihelion_distance(&self) -> f64 {
        self.semi_major_axis * (1.0 - self.eccentricity)
    }

    /// Same orbit with Ω, ω and M reduced into `[0, 360)`.
    pub fn normalized(mut self) -> Self {
        self.ascending_node_longitude = principal_angle_deg(self.ascending_node_longitude);
        self.periapsis_argument = principal_angle_deg(self.periapsis_argument);
        self.mean_anomaly = principal_angle_deg(self.mean_anomaly);
        self
    }
}

impl fmt::Display for KeplerianElements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Keplerian Elements @ epoch (JD): {:.6}",
            self.reference_epoch
        )?;
        writeln!(f, "-------------------------------------------")?;
        writeln!(
            f,
            "  a   (semi-major axis)       = {:.6} AU",
            self.semi_major_axis
        )?;
        writeln!(
            f,
            "  e   (eccentricity)          = {:.6}",
            self.eccentricity
        )?;
        writeln!(
            f,
            "  i   (inclination)           = {:.6}°",
            self.inclination
        )?;
        writeln!(
            f,
            "  Ω   (longitude of node)     = {:.6}°",
            self.ascending_node_longitude
        )?;
        writeln!(
            f,
            "  ω   (argument of periapsis) = {:.6}°",
            self.periapsis_argument
        )?;
        write!(
            f,
            "  M   (mean anomaly)          = {:.6}°",
            self.mean_anomaly
        )
    }
}
