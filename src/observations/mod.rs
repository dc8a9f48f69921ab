//! # Observations and nightly batches
//!
//! An [`Observation`] is one alert-level detection of a moving-object candidate: sky
//! position (degrees), epoch (JD), PSF magnitude, photometric band and the survey night
//! it was taken in. Observations are immutable once ingested.
//!
//! Detections reach the pipeline grouped by night in a [`NightBatch`]. A batch must be
//! validated with [`NightBatch::validate`] before any association stage reads it: a
//! corrupted batch aborts the night before the trajectory store is touched.
//!
//! ## See also
//! * [`tracklet::Tracklet`] – same-night chain of observations built by the intra-night clustering.
//! * [`batch_reader::read_night_csv`] – CSV ingestion of a nightly batch.
pub mod batch_reader;
pub mod tracklet;

use std::cmp::Ordering;

use ahash::AHashSet;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::{
    asterlink_errors::AsterlinkError,
    constants::{CandId, Degree, FilterId, Magnitude, NightId, JD},
    conversion::{angular_separation, tangent_offset},
};

/// A single detection.
///
/// # Fields
///
/// * `candid` - unique detection identifier
/// * `ra` - right ascension (degrees)
/// * `dec` - declination (degrees)
/// * `jd` - epoch of the exposure (julian date)
/// * `magpsf` - PSF-fit magnitude
/// * `fid` - photometric band identifier
/// * `nid` - survey night number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub candid: CandId,
    pub ra: Degree,
    pub dec: Degree,
    pub jd: JD,
    pub magpsf: Magnitude,
    pub fid: FilterId,
    pub nid: NightId,
}

impl Observation {
    pub fn new(
        candid: CandId,
        ra: Degree,
        dec: Degree,
        jd: JD,
        magpsf: Magnitude,
        fid: FilterId,
        nid: NightId,
    ) -> Self {
        Observation {
            candid,
            ra,
            dec,
            jd,
            magpsf,
            fid,
            nid,
        }
    }

    /// Great-circle separation to another observation (degrees).
    pub fn separation(&self, other: &Observation) -> Degree {
        angular_separation(self.ra, self.dec, other.ra, other.dec)
    }

    /// Tangent-plane displacement from `self` to `other` (degrees).
    pub fn offset_to(&self, other: &Observation) -> Vector2<f64> {
        tangent_offset(self.ra, self.dec, other.ra, other.dec)
    }

    /// Absolute magnitude difference with another observation.
    pub fn magdiff(&self, other: &Observation) -> Magnitude {
        (self.magpsf - other.magpsf).abs()
    }

    /// Chronological order, ties broken by detection id.
    pub fn time_order(&self, other: &Observation) -> Ordering {
        self.jd
            .total_cmp(&other.jd)
            .then_with(|| self.candid.cmp(&other.candid))
    }

    fn check(&self) -> Result<(), AsterlinkError> {
        let bad = |what: &str| {
            Err(AsterlinkError::InvalidObservation(format!(
                "candid {}: {what}",
                self.candid
            )))
        };
        if !self.ra.is_finite() || !(0.0..360.0).contains(&self.ra) {
            return bad("right ascension outside [0, 360)");
        }
        if !self.dec.is_finite() || !(-90.0..=90.0).contains(&self.dec) {
            return bad("declination outside [-90, 90]");
        }
        if !self.jd.is_finite() || self.jd <= 0.0 {
            return bad("invalid julian date");
        }
        if !self.magpsf.is_finite() {
            return bad("magnitude is not finite");
        }
        Ok(())
    }
}

/// All detections of one survey night.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NightBatch {
    pub nid: NightId,
    pub observations: Vec<Observation>,
}

impl NightBatch {
    pub fn new(nid: NightId, observations: Vec<Observation>) -> Self {
        NightBatch { nid, observations }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Check that the batch can be handed to the association stages.
    ///
    /// Return
    /// ------
    /// * `Err(InvalidObservation)` for non-finite or out-of-range coordinates, or an
    ///   observation whose night differs from the batch night.
    /// * `Err(DuplicateCandId)` when a detection id appears twice.
    pub fn validate(&self) -> Result<(), AsterlinkError> {
        let mut seen = AHashSet::with_capacity(self.observations.len());
        for obs in &self.observations {
            obs.check()?;
            if obs.nid != self.nid {
                return Err(AsterlinkError::InvalidObservation(format!(
                    "candid {} belongs to night {} but the batch is night {}",
                    obs.candid, obs.nid, self.nid
                )));
            }
            if !seen.insert(obs.candid) {
                return Err(AsterlinkError::DuplicateCandId(obs.candid));
            }
        }
        Ok(())
    }

    /// Observations in `(jd, candid)` order.
    pub fn sorted_observations(&self) -> Vec<Observation> {
        let mut sorted = self.observations.clone();
        sorted.sort_by(Observation::time_order);
        sorted
    }
}
