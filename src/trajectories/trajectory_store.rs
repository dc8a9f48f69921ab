//! # Trajectory store
//!
//! The [`TrajectoryStore`] is the authoritative state carried from one night to the next:
//!
//! * the candidate trajectories, keyed by [`TrajectoryId`] in a `BTreeMap` so that every
//!   iteration runs in id order,
//! * the id counter (ids increase monotonically and are never reused, even after pruning),
//! * the pool of old unmatched detections with their age, eligible for late linking,
//! * the set of trajectories updated during the current night.
//!
//! ## Lifecycle
//!
//! ```text
//! begin_night(nid) → record_update / insert_new (linking) → advance_night → prune
//!                  → add_to_pool (leftover detections) → mark_confirmed / record_fit_failure
//! ```
//!
//! `advance_night` increments the without-update counter of every trajectory that was not
//! touched this night and the age of every pooled detection. `prune` then removes
//!
//! * trajectories whose counter exceeds `trajectory_keep_limit`,
//! * 2-point trajectories whose counter exceeds `trajectory_2_points_keep_limit`,
//! * pooled detections older than `old_observation_keep_limit`.
//!
//! A failed orbit fit never removes a trajectory; only the age policy does.
//!
//! The store is `Clone`: the orchestrator runs a night on a copy and swaps it in once the
//! whole cycle succeeded.
use std::collections::{BTreeMap, BTreeSet};

use ahash::AHashSet;
use tracing::debug;

use crate::{
    asterlink_errors::AsterlinkError,
    config::TwParams,
    constants::{CandId, NightId, TrajectoryId},
    observations::Observation,
    orbit_fit::keplerian_element::KeplerianElements,
    trajectories::{FitRecord, Trajectory},
};

/// A detection waiting in the old-observation pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PooledObservation {
    pub observation: Observation,
    /// Processed nights since it entered the pool.
    pub age: u32,
}

/// What a call to [`TrajectoryStore::prune`] removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub trajectories: Vec<TrajectoryId>,
    pub pooled_observations: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrajectoryStore {
    trajectories: BTreeMap<TrajectoryId, Trajectory>,
    next_id: u64,
    pool: Vec<PooledObservation>,
    updated: BTreeSet<TrajectoryId>,
    current_nid: NightId,
}

impl TrajectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.trajectories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }

    pub fn get(&self, id: TrajectoryId) -> Option<&Trajectory> {
        self.trajectories.get(&id)
    }

    pub fn contains(&self, id: TrajectoryId) -> bool {
        self.trajectories.contains_key(&id)
    }

    /// Trajectories in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Trajectory> {
        self.trajectories.values()
    }

    pub fn ids(&self) -> Vec<TrajectoryId> {
        self.trajectories.keys().copied().collect()
    }

    /// The id the next inserted trajectory will get.
    pub fn next_id(&self) -> TrajectoryId {
        TrajectoryId(self.next_id)
    }

    pub fn current_nid(&self) -> NightId {
        self.current_nid
    }

    pub fn was_updated(&self, id: TrajectoryId) -> bool {
        self.updated.contains(&id)
    }

    /// Ids updated or created during the current night.
    pub fn updated_ids(&self) -> impl Iterator<Item = TrajectoryId> + '_ {
        self.updated.iter().copied()
    }

    /// Open a new night: forget the previous update set.
    pub fn begin_night(&mut self, nid: NightId) {
        self.updated.clear();
        self.current_nid = nid;
    }

    /// Register a new trajectory built from at least two detections.
    ///
    /// The new trajectory counts as updated for the current night.
    pub fn insert_new(
        &mut self,
        observations: impl IntoIterator<Item = Observation>,
    ) -> Result<TrajectoryId, AsterlinkError> {
        let id = TrajectoryId(self.next_id);
        let trajectory = Trajectory::new(id, observations, self.current_nid)?;
        self.next_id += 1;
        self.trajectories.insert(id, trajectory);
        self.updated.insert(id);
        Ok(id)
    }

    /// Append new detections to a trajectory and reset its without-update counter.
    ///
    /// Return
    /// ------
    /// * the number of appended detections,
    /// * `Err(UnknownTrajectory)` if `id` is not in the store,
    /// * `Err(InvalidObservation | DuplicateCandId)` if the detections would break the
    ///   time ordering; the trajectory is unchanged in that case.
    pub fn record_update(
        &mut self,
        id: TrajectoryId,
        observations: impl IntoIterator<Item = Observation>,
    ) -> Result<usize, AsterlinkError> {
        let trajectory = self
            .trajectories
            .get_mut(&id)
            .ok_or(AsterlinkError::UnknownTrajectory(id))?;
        let added = trajectory.extend(observations)?;
        trajectory.nights_without_update = 0;
        trajectory.last_update_nid = self.current_nid;
        self.updated.insert(id);
        Ok(added)
    }

    /// Age every trajectory not updated this night, and every pooled detection.
    pub fn advance_night(&mut self) {
        for (id, trajectory) in self.trajectories.iter_mut() {
            if !self.updated.contains(id) {
                trajectory.nights_without_update += 1;
            }
        }
        for pooled in self.pool.iter_mut() {
            pooled.age += 1;
        }
    }

    /// Remove stale trajectories and pooled detections.
    pub fn prune(&mut self, limits: &TwParams) -> PruneReport {
        let stale: Vec<TrajectoryId> = self
            .trajectories
            .values()
            .filter(|t| {
                t.nights_without_update > limits.trajectory_keep_limit
                    || (t.len() == 2
                        && t.nights_without_update > limits.trajectory_2_points_keep_limit)
            })
            .map(|t| t.id)
            .collect();
        for id in &stale {
            self.trajectories.remove(id);
            self.updated.remove(id);
        }

        let before = self.pool.len();
        self.pool.retain(|p| p.age <= limits.old_observation_keep_limit);
        let report = PruneReport {
            trajectories: stale,
            pooled_observations: before - self.pool.len(),
        };
        debug!(
            pruned_trajectories = report.trajectories.len(),
            pruned_observations = report.pooled_observations,
            "store pruned"
        );
        report
    }

    pub fn pool(&self) -> &[PooledObservation] {
        &self.pool
    }

    /// Detections of the old-observation pool, in pool order.
    pub fn pool_observations(&self) -> impl Iterator<Item = &Observation> {
        self.pool.iter().map(|p| &p.observation)
    }

    /// Add unmatched detections of the current night to the pool (age 0).
    pub fn add_to_pool(&mut self, observations: impl IntoIterator<Item = Observation>) {
        self.pool.extend(observations.into_iter().map(|observation| PooledObservation {
            observation,
            age: 0,
        }));
    }

    /// Remove consumed detections from the pool and return them.
    pub fn take_pool(&mut self, candids: &[CandId]) -> Vec<Observation> {
        let wanted: AHashSet<CandId> = candids.iter().copied().collect();
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pool)
            .into_iter()
            .partition(|p| wanted.contains(&p.observation.candid));
        self.pool = kept;
        taken.into_iter().map(|p| p.observation).collect()
    }

    /// Trajectories to submit to the orbit fit this night.
    ///
    /// A trajectory qualifies when it was updated this night, holds at least
    /// `min_points` detections and has not already been fitted at its current size.
    pub fn fit_queue(&self, min_points: usize) -> Vec<TrajectoryId> {
        self.updated
            .iter()
            .filter_map(|id| self.trajectories.get(id))
            .filter(|t| t.len() >= min_points && t.last_fit_len() != Some(t.len()))
            .map(|t| t.id)
            .collect()
    }

    /// Attach the elements of a successful fit.
    pub fn mark_confirmed(
        &mut self,
        id: TrajectoryId,
        elements: KeplerianElements,
        record: FitRecord,
    ) -> Result<(), AsterlinkError> {
        let trajectory = self
            .trajectories
            .get_mut(&id)
            .ok_or(AsterlinkError::UnknownTrajectory(id))?;
        trajectory.orbit = Some(elements);
        trajectory.confirmed = true;
        trajectory.needs_revalidation = false;
        trajectory.fit_history.push(record);
        Ok(())
    }

    /// Record a failed fit. Confirmed elements are kept but flagged for re-validation.
    pub fn record_fit_failure(
        &mut self,
        id: TrajectoryId,
        record: FitRecord,
    ) -> Result<(), AsterlinkError> {
        let trajectory = self
            .trajectories
            .get_mut(&id)
            .ok_or(AsterlinkError::UnknownTrajectory(id))?;
        if trajectory.confirmed {
            trajectory.needs_revalidation = true;
        }
        trajectory.fit_history.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod trajectory_store_test {
    use super::*;

    fn obs(candid: u64, jd: f64) -> Observation {
        Observation::new(candid, 20.0 + jd * 0.01, 3.0, jd, 18.0, 1, jd as u32)
    }

    fn limits(keep: u32, keep_obs: u32, keep_2pts: u32) -> TwParams {
        TwParams {
            trajectory_keep_limit: keep,
            old_observation_keep_limit: keep_obs,
            trajectory_2_points_keep_limit: keep_2pts,
        }
    }

    fn record(n_points: usize, success: bool) -> FitRecord {
        FitRecord {
            nid: 0,
            n_points,
            trials_run: 1,
            converged: success as u32,
            failed: (!success) as u32,
            timed_out: 0,
            success,
        }
    }

    #[test]
    fn test_ids_are_monotonic_and_never_reused() {
        let mut store = TrajectoryStore::new();
        store.begin_night(1);
        let a = store.insert_new(vec![obs(1, 1.1), obs(2, 1.2)]).unwrap();
        let b = store.insert_new(vec![obs(3, 1.1), obs(4, 1.2)]).unwrap();
        assert!(a < b);

        for nid in 2..=4 {
            store.begin_night(nid);
            store.advance_night();
            store.prune(&limits(5, 2, 1));
        }
        assert!(store.is_empty());

        store.begin_night(5);
        let c = store.insert_new(vec![obs(5, 5.1), obs(6, 5.2)]).unwrap();
        assert!(c > b);
    }

    #[test]
    fn test_two_points_pruned_before_keep_limit() {
        let mut store = TrajectoryStore::new();
        store.begin_night(1);
        let two = store.insert_new(vec![obs(1, 1.1), obs(2, 1.2)]).unwrap();
        let three = store
            .insert_new(vec![obs(3, 1.1), obs(4, 1.2), obs(5, 1.3)])
            .unwrap();

        let limits = limits(4, 2, 2);
        let mut pruned = Vec::new();
        for nid in 2..=4 {
            store.begin_night(nid);
            store.advance_night();
            pruned.extend(store.prune(&limits).trajectories);
        }
        // 2-point trajectory has waited 3 nights > 2
        assert_eq!(pruned, vec![two]);
        assert!(store.contains(three));
        assert_eq!(store.get(three).unwrap().nights_without_update, 3);

        store.begin_night(5);
        store.advance_night();
        assert!(store.prune(&limits).trajectories.is_empty());

        store.begin_night(6);
        store.advance_night();
        assert_eq!(store.prune(&limits).trajectories, vec![three]);
    }

    #[test]
    fn test_record_update_resets_counter() {
        let mut store = TrajectoryStore::new();
        store.begin_night(1);
        let id = store.insert_new(vec![obs(1, 1.1), obs(2, 1.2)]).unwrap();

        store.begin_night(2);
        store.advance_night();
        assert_eq!(store.get(id).unwrap().nights_without_update, 1);

        store.begin_night(3);
        assert_eq!(store.record_update(id, vec![obs(3, 3.1)]).unwrap(), 1);
        store.advance_night();
        let traj = store.get(id).unwrap();
        assert_eq!(traj.nights_without_update, 0);
        assert_eq!(traj.last_update_nid, 3);
        assert_eq!(traj.len(), 3);

        assert_eq!(
            store.record_update(TrajectoryId(99), vec![obs(9, 3.2)]),
            Err(AsterlinkError::UnknownTrajectory(TrajectoryId(99)))
        );
    }

    #[test]
    fn test_pool_window() {
        let mut store = TrajectoryStore::new();
        store.begin_night(1);
        store.add_to_pool(vec![obs(1, 1.1), obs(2, 1.2)]);

        store.begin_night(2);
        store.advance_night();
        store.prune(&limits(5, 1, 2));
        assert_eq!(store.pool().len(), 2);

        assert_eq!(store.take_pool(&[2]).len(), 1);
        assert_eq!(store.pool().len(), 1);

        store.begin_night(3);
        store.advance_night();
        let report = store.prune(&limits(5, 1, 2));
        assert_eq!(report.pooled_observations, 1);
        assert!(store.pool().is_empty());
    }

    #[test]
    fn test_fit_queue_and_confirmation() {
        let mut store = TrajectoryStore::new();
        store.begin_night(1);
        let id = store
            .insert_new(vec![obs(1, 1.1), obs(2, 1.2), obs(3, 1.3)])
            .unwrap();
        assert_eq!(store.fit_queue(3), vec![id]);
        assert!(store.fit_queue(4).is_empty());

        store.record_fit_failure(id, record(3, false)).unwrap();
        assert!(store.fit_queue(3).is_empty());
        assert!(!store.get(id).unwrap().needs_revalidation);

        store.begin_night(2);
        store.record_update(id, vec![obs(4, 2.1)]).unwrap();
        assert_eq!(store.fit_queue(3), vec![id]);

        let elements = KeplerianElements {
            reference_epoch: 2459000.5,
            semi_major_axis: 2.5,
            eccentricity: 0.1,
            inclination: 5.0,
            ascending_node_longitude: 10.0,
            periapsis_argument: 20.0,
            mean_anomaly: 30.0,
        };
        store.mark_confirmed(id, elements, record(4, true)).unwrap();
        assert!(store.get(id).unwrap().confirmed);

        store.begin_night(3);
        store.record_update(id, vec![obs(5, 3.1)]).unwrap();
        store.record_fit_failure(id, record(5, false)).unwrap();
        let traj = store.get(id).unwrap();
        assert!(traj.confirmed);
        assert!(traj.needs_revalidation);
        assert_eq!(traj.orbit, Some(elements));
        assert_eq!(traj.fit_history.len(), 3);
    }
}
