//! # Candidate trajectories
//!
//! A [`Trajectory`] is a multi-night candidate asteroid track: a strictly time-ordered
//! list of detections without duplicate ids, plus its lifecycle state (nights since the
//! last extension, orbital elements once a fit succeeded, confirmation flag, fit history).
//!
//! Trajectories are owned by the [`TrajectoryStore`](trajectory_store::TrajectoryStore);
//! every mutation goes through the store so that the lifecycle stays auditable.
//!
//! ## Motion model
//!
//! The linker needs the last known motion of a trajectory. It is the tangent-plane
//! velocity between the last detection and the latest earlier detection with a
//! different epoch (degrees/day). Projection moves the last detection along that
//! velocity.
//!
//! ## See also
//! * [`trajectory_store`] – ownership, ageing and pruning.
//! * [`designation`] – MPC packed provisional designations.
//! * [`association_sink`] – output records and the CSV sink.
pub mod association_sink;
pub mod designation;
pub mod trajectory_store;

use ahash::AHashSet;
use nalgebra::Vector2;
use serde::Serialize;

use crate::{
    asterlink_errors::AsterlinkError,
    constants::{CandId, Degree, NightId, Observations, TrajectoryId, EPS, JD},
    conversion::apply_offset,
    observations::Observation,
    orbit_fit::keplerian_element::KeplerianElements,
};

/// Summary of one orbit-fit attempt, kept on the trajectory as metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitRecord {
    /// Night during which the fit ran.
    pub nid: NightId,
    /// Point count of the trajectory at fit time.
    pub n_points: usize,
    pub trials_run: u32,
    pub converged: u32,
    pub failed: u32,
    pub timed_out: u32,
    pub success: bool,
}

/// A candidate multi-night track.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub id: TrajectoryId,
    observations: Observations,
    /// Night of the last extension (or creation).
    pub last_update_nid: NightId,
    /// Processed nights since the last extension.
    pub nights_without_update: u32,
    /// Present once an orbit fit succeeded.
    pub orbit: Option<KeplerianElements>,
    pub confirmed: bool,
    /// Set when a confirmed trajectory grew and its new fit failed.
    pub needs_revalidation: bool,
    pub fit_history: Vec<FitRecord>,
}

/// Check that `observations` are strictly time-ordered with unique ids.
fn check_ordering(observations: &[Observation]) -> Result<(), AsterlinkError> {
    let mut seen = AHashSet::with_capacity(observations.len());
    for obs in observations {
        if !seen.insert(obs.candid) {
            return Err(AsterlinkError::DuplicateCandId(obs.candid));
        }
    }
    if let Some(pair) = observations.windows(2).find(|w| w[0].jd >= w[1].jd) {
        return Err(AsterlinkError::InvalidObservation(format!(
            "detections {} and {} are not strictly time-ordered",
            pair[0].candid, pair[1].candid
        )));
    }
    Ok(())
}

impl Trajectory {
    /// Build a trajectory from at least two detections (sorted here).
    pub(crate) fn new(
        id: TrajectoryId,
        observations: impl IntoIterator<Item = Observation>,
        nid: NightId,
    ) -> Result<Self, AsterlinkError> {
        let mut observations: Observations = observations.into_iter().collect();
        observations.sort_by(Observation::time_order);
        if observations.len() < 2 {
            return Err(AsterlinkError::InvalidObservation(format!(
                "trajectory {id} needs at least two detections"
            )));
        }
        check_ordering(&observations)?;
        Ok(Trajectory {
            id,
            observations,
            last_update_nid: nid,
            nights_without_update: 0,
            orbit: None,
            confirmed: false,
            needs_revalidation: false,
            fit_history: Vec::new(),
        })
    }

    /// Append later detections; the trajectory is left untouched on error.
    pub(crate) fn extend(
        &mut self,
        new_observations: impl IntoIterator<Item = Observation>,
    ) -> Result<usize, AsterlinkError> {
        let mut extended = self.observations.clone();
        let before = extended.len();
        let mut incoming: Vec<Observation> = new_observations.into_iter().collect();
        incoming.sort_by(Observation::time_order);
        extended.extend(incoming);
        check_ordering(&extended)?;
        let added = extended.len() - before;
        self.observations = extended;
        Ok(added)
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn first(&self) -> &Observation {
        &self.observations[0]
    }

    pub fn last(&self) -> &Observation {
        &self.observations[self.observations.len() - 1]
    }

    pub fn candids(&self) -> Vec<CandId> {
        self.observations.iter().map(|o| o.candid).collect()
    }

    /// Last known tangent-plane velocity (degrees/day).
    ///
    /// Return
    /// ------
    /// * `None` when every detection shares the epoch of the last one.
    pub fn motion(&self) -> Option<Vector2<f64>> {
        let last = self.last();
        let previous = self
            .observations
            .iter()
            .rev()
            .find(|o| last.jd - o.jd > EPS)?;
        Some(previous.offset_to(last) / (last.jd - previous.jd))
    }

    /// Position predicted at epoch `jd` by moving the last detection along
    /// [`motion`](Self::motion).
    pub fn project(&self, jd: JD) -> Option<(Degree, Degree)> {
        let motion = self.motion()?;
        let last = self.last();
        Some(apply_offset(last.ra, last.dec, &(motion * (jd - last.jd))))
    }

    /// Point count at the last fit attempt, if any.
    pub fn last_fit_len(&self) -> Option<usize> {
        self.fit_history.last().map(|r| r.n_points)
    }
}
