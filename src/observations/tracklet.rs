//! Same-night chains of detections.
use nalgebra::Vector2;

use crate::{
    constants::{CandId, NightId, Observations, EPS, JD},
    observations::Observation,
};

/// An ordered chain of at least two observations of the same night.
///
/// The observations are strictly time-ordered. The tracklet index is local to the
/// night that produced it; trajectory ids are only handed out by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracklet {
    pub index: usize,
    observations: Observations,
}

impl Tracklet {
    /// Build a tracklet, sorting the observations chronologically.
    ///
    /// Return
    /// ------
    /// * `None` when fewer than two observations are given.
    pub fn new(index: usize, observations: impl IntoIterator<Item = Observation>) -> Option<Self> {
        let mut observations: Observations = observations.into_iter().collect();
        if observations.len() < 2 {
            return None;
        }
        observations.sort_by(Observation::time_order);
        Some(Tracklet {
            index,
            observations,
        })
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn into_observations(self) -> Observations {
        self.observations
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

    pub fn nid(&self) -> NightId {
        self.first().nid
    }

    pub fn candids(&self) -> Vec<CandId> {
        self.observations.iter().map(|o| o.candid).collect()
    }

    /// Time elapsed between the first and the last detection (days).
    pub fn time_span(&self) -> JD {
        self.last().jd - self.first().jd
    }

    /// Mean angular velocity in the tangent plane (degrees/day).
    ///
    /// Zero when all detections share the same epoch.
    pub fn motion(&self) -> Vector2<f64> {
        let span = self.time_span();
        if span < EPS {
            return Vector2::zeros();
        }
        self.first().offset_to(self.last()) / span
    }
}

#[cfg(test)]
mod tracklet_test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_tracklet_motion() {
        let tracklet = Tracklet::new(
            0,
            vec![
                Observation::new(2, 10.02, 0.0, 2459000.7, 18.0, 1, 1),
                Observation::new(1, 10.0, 0.0, 2459000.6, 18.0, 1, 1),
            ],
        )
        .unwrap();

        assert_eq!(tracklet.candids(), vec![1, 2]);
        assert_abs_diff_eq!(tracklet.time_span(), 0.1, epsilon = 1e-6);
        let motion = tracklet.motion();
        assert_abs_diff_eq!(motion.x, 0.2, epsilon = 1e-6);
        assert_abs_diff_eq!(motion.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_tracklet_needs_two_points() {
        assert!(Tracklet::new(0, vec![Observation::new(1, 1.0, 1.0, 1.0, 18.0, 1, 1)]).is_none());
    }
}
