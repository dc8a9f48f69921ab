//! # Constants and type definitions for asterlink
//!
//! This module centralizes the **unit conversions**, **type aliases** and **identifiers**
//! shared by the association engine and the orbit validation layer.
//!
//! ## Overview
//!
//! - Unit conversions (degrees ↔ radians, arcseconds ↔ degrees, JD ↔ MJD)
//! - Unit aliases used across the crate (`Degree`, `ArcSec`, `JD`, …)
//! - Identifiers for detections, nights, filters and trajectories
//! - The inline container used to store the observations of a tracklet or a trajectory

use crate::observations::Observation;
use smallvec::SmallVec;

// -------------------------------------------------------------------------------------------------
// Unit conversions
// -------------------------------------------------------------------------------------------------

/// Degrees → radians
pub const RADEG: f64 = std::f64::consts::PI / 180.0;

/// Arcseconds in one degree
pub const ARCSEC_PER_DEG: f64 = 3600.0;

/// Conversion factor between Julian Date and Modified Julian Date
pub const JDTOMJD: f64 = 2400000.5;

/// Numerical epsilon used for floating-point comparisons
pub const EPS: f64 = 1e-9;

/// Magnitude-rate normalisation floor (days): gaps shorter than one day are not divided.
pub const MIN_RATE_INTERVAL: f64 = 1.0;

/// Default MPC observatory code of the survey (ZTF, Palomar).
pub const DEFAULT_OBS_CODE: &str = "I41";

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Angle in degrees
pub type Degree = f64;
/// Angle in arcseconds
pub type ArcSec = f64;
/// Julian Date (days)
pub type JD = f64;
/// Modified Julian Date (days)
pub type MJD = f64;
/// Apparent magnitude
pub type Magnitude = f64;

/// Unique detection identifier, as delivered by the alert broker.
pub type CandId = u64;
/// Survey night number.
pub type NightId = u32;
/// Photometric band identifier (1 = g, 2 = r, 3 = i for ZTF).
pub type FilterId = u8;

/// Identifier of a candidate trajectory.
///
/// Ids are handed out by the [`TrajectoryStore`](crate::trajectories::trajectory_store::TrajectoryStore)
/// in strictly increasing order and are never reused, even after pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct TrajectoryId(pub u64);

impl std::fmt::Display for TrajectoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TrajectoryId {
    fn from(n: u64) -> Self {
        TrajectoryId(n)
    }
}

/// A small, inline-optimized container for the observations of a tracklet or a trajectory.
pub type Observations = SmallVec<[Observation; 6]>;
