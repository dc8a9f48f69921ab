//! # Inter-night linking
//!
//! Extends the trajectories of the [`TrajectoryStore`] with the tracklets and singletons
//! of a new night, and creates new trajectories from what remains. The stages run in a
//! fixed priority order, each one consuming what the previous ones left:
//!
//! | # | Stage (`[ASSOC_SYSTEM]` switch)            | Left side            | Right side            |
//! |---|---------------------------------------------|----------------------|-----------------------|
//! | 1 | `tracklets_with_trajectories`               | trajectories         | new tracklets         |
//! | 2 | `trajectories_with_new_observations`        | trajectories         | new singletons        |
//! | 3 | `tracklets_with_old_observations`           | new tracklets        | pooled detections     |
//! | 4 | `new_observations_with_old_observations`    | new singletons       | pooled detections     |
//!
//! Tracklets already holding `orbfit_min_points` detections skip the stages and become
//! trajectories straight away. After the stages, every remaining tracklet becomes a new
//! trajectory; the remaining singletons are handed back to the caller for the pool.
//!
//! ## Acceptance test (stages 1 to 3)
//!
//! The left side has a known motion. Its anchor detection is moved along that motion to
//! the epoch of the candidate detection and the pair is accepted when
//!
//! * the projected position lies within `inter_night_separation`,
//! * the inter-night photometric rate passes,
//! * the turn angle between the motion and the segment joining the two detections does
//!   not exceed `maximum_angle` (the angle is divided by the gap when the gap is longer
//!   than one day; a segment without length has no direction and passes).
//!
//! Stage 4 has no motion to project: the raw separation and the photometric rate are used.
//!
//! Candidate evaluation is spread over the worker pool, one task per left item; the
//! accepted candidates are resolved by [`resolve_one_to_one`] and applied to the store
//! serially.
use nalgebra::Vector2;
use rayon::{prelude::*, ThreadPool};
use serde::Serialize;
use tracing::debug;

use crate::{
    associations::{
        intra_night::IntraNightResult, resolve_one_to_one, AssociationCandidate, MatchCost,
        PhotometricRule,
    },
    asterlink_errors::AsterlinkError,
    config::Config,
    constants::{Degree, TrajectoryId, EPS},
    conversion::{angular_separation, apply_offset, turn_angle},
    observations::{tracklet::Tracklet, Observation},
    trajectories::trajectory_store::TrajectoryStore,
};

/// Number of links made by each stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub tracklets_with_trajectories: usize,
    pub trajectories_with_new_observations: usize,
    pub tracklets_with_old_observations: usize,
    pub new_observations_with_old_observations: usize,
}

impl StageCounts {
    pub fn total(&self) -> usize {
        self.tracklets_with_trajectories
            + self.trajectories_with_new_observations
            + self.tracklets_with_old_observations
            + self.new_observations_with_old_observations
    }
}

/// Result of [`link_night`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkOutcome {
    pub counts: StageCounts,
    /// Trajectories created this night, whatever the stage.
    pub new_trajectories: Vec<TrajectoryId>,
    /// Singletons consumed by no stage, to be added to the pool.
    pub leftover: Vec<Observation>,
}

/// Matching thresholds shared by the stages of one night.
struct Matcher {
    max_sep: Degree,
    max_angle: Degree,
    rule: PhotometricRule,
}

impl Matcher {
    fn new(config: &Config) -> Self {
        let params = &config.assoc_params;
        Matcher {
            max_sep: params.inter_night_separation,
            max_angle: params.maximum_angle,
            rule: PhotometricRule::inter_night(params),
        }
    }

    /// Score `target` against `anchor` moving with `motion` (degrees/day).
    ///
    /// The two detections can come in any time order but must not share an epoch.
    fn projected(
        &self,
        anchor: &Observation,
        motion: &Vector2<f64>,
        target: &Observation,
    ) -> Option<MatchCost> {
        let dt = target.jd - anchor.jd;
        if dt.abs() < EPS {
            return None;
        }
        let (ra, dec) = apply_offset(anchor.ra, anchor.dec, &(motion * dt));
        let separation = angular_separation(ra, dec, target.ra, target.dec);
        if separation > self.max_sep {
            return None;
        }

        let (earlier, later) = if dt > 0.0 {
            (anchor, target)
        } else {
            (target, anchor)
        };
        let magdiff = self.rule.check(earlier, later)?;

        let gap = dt.abs();
        let segment = earlier.offset_to(later) / gap;
        if let Some(angle) = turn_angle(motion, &segment) {
            let angle = if gap > 1.0 { angle / gap } else { angle };
            if angle > self.max_angle {
                return None;
            }
        }

        Some(MatchCost::new(
            separation,
            self.max_sep,
            self.rule.normalised(earlier, later, magdiff),
        ))
    }

    /// Score two detections without motion information (`earlier` strictly first).
    fn direct(&self, earlier: &Observation, later: &Observation) -> Option<MatchCost> {
        if later.jd - earlier.jd < EPS {
            return None;
        }
        let separation = earlier.separation(later);
        if separation > self.max_sep {
            return None;
        }
        let magdiff = self.rule.check(earlier, later)?;
        Some(MatchCost::new(
            separation,
            self.max_sep,
            self.rule.normalised(earlier, later, magdiff),
        ))
    }
}

/// Evaluate every `(left, right)` pair on the worker pool.
///
/// The candidate count is checked against the memory budget before anything is
/// evaluated.
fn collect_candidates<F>(
    workers: &ThreadPool,
    stage: &str,
    n_left: usize,
    n_right: usize,
    budget_bytes: u64,
    eval: F,
) -> Result<Vec<AssociationCandidate>, AsterlinkError>
where
    F: Fn(usize, usize) -> Option<AssociationCandidate> + Sync + Send,
{
    let pairs = (n_left as u64).saturating_mul(n_right as u64);
    let needed = pairs.saturating_mul(std::mem::size_of::<AssociationCandidate>() as u64);
    if needed > budget_bytes {
        return Err(AsterlinkError::ResourceExhaustion(format!(
            "stage {stage} would evaluate {pairs} candidates ({needed} bytes), \
             over the executor memory budget of {budget_bytes} bytes"
        )));
    }

    let eval = &eval;
    let candidates: Vec<AssociationCandidate> = workers.install(|| {
        (0..n_left)
            .into_par_iter()
            .flat_map_iter(|left| (0..n_right).filter_map(move |right| eval(left, right)))
            .collect()
    });
    debug!(stage, pairs, accepted = candidates.len(), "candidates evaluated");
    Ok(candidates)
}

fn candidate(
    left: usize,
    right: usize,
    left_key: u64,
    right_key: u64,
    cost: MatchCost,
) -> AssociationCandidate {
    AssociationCandidate {
        left,
        right,
        left_key,
        right_key,
        cost,
    }
}

/// Link one night of clustered detections into the store.
///
/// Arguments
/// ---------
/// * `store`: the trajectory store, already opened on the night with `begin_night`
/// * `night`: tracklets and singletons of the night
/// * `config`: thresholds, stage switches, `orbfit_min_points` and the memory budget
/// * `workers`: pool running the candidate evaluation
///
/// Return
/// ------
/// * the per-stage counts, the created trajectories and the unconsumed singletons,
/// * `Err(ResourceExhaustion)` when a stage exceeds the memory budget,
/// * store errors (`InvalidObservation`, `DuplicateCandId`) when a link would break the
///   ordering of a trajectory.
pub fn link_night(
    store: &mut TrajectoryStore,
    night: IntraNightResult,
    config: &Config,
    workers: &ThreadPool,
) -> Result<LinkOutcome, AsterlinkError> {
    let matcher = Matcher::new(config);
    let stages = config.assoc_system;
    let budget = config.resources.executor_memory_bytes()?;
    let min_points = config.solve_orbit_params.orbfit_min_points;

    let mut outcome = LinkOutcome::default();
    let IntraNightResult {
        tracklets,
        singletons,
    } = night;

    // long tracklets go straight to the orbit fit
    let (long, mut tracklets): (Vec<Tracklet>, Vec<Tracklet>) =
        tracklets.into_iter().partition(|t| t.len() >= min_points);
    for tracklet in long {
        outcome
            .new_trajectories
            .push(store.insert_new(tracklet.into_observations())?);
    }
    let mut singletons = singletons;

    if stages.tracklets_with_trajectories && !tracklets.is_empty() {
        let trajectories: Vec<_> = store
            .iter()
            .filter(|t| !store.was_updated(t.id))
            .filter_map(|t| t.motion().map(|m| (t.id, t.last().clone(), m)))
            .collect();
        let found = collect_candidates(
            workers,
            "tracklets_with_trajectories",
            trajectories.len(),
            tracklets.len(),
            budget,
            |l, r| {
                let (id, last, motion) = &trajectories[l];
                let first = tracklets[r].first();
                if first.jd - last.jd < EPS {
                    return None;
                }
                let cost = matcher.projected(last, motion, first)?;
                Some(candidate(l, r, id.0, first.candid, cost))
            },
        )?;

        let links = resolve_one_to_one(found);
        let consumed = links.iter().map(|c| c.right).collect::<Vec<_>>();
        for link in &links {
            let id = trajectories[link.left].0;
            store.record_update(id, tracklets[link.right].observations().iter().cloned())?;
        }
        outcome.counts.tracklets_with_trajectories = links.len();
        tracklets = remove_indices(tracklets, &consumed);
    }

    if stages.trajectories_with_new_observations && !singletons.is_empty() {
        let trajectories: Vec<_> = store
            .iter()
            .filter(|t| !store.was_updated(t.id))
            .filter_map(|t| t.motion().map(|m| (t.id, t.last().clone(), m)))
            .collect();
        let found = collect_candidates(
            workers,
            "trajectories_with_new_observations",
            trajectories.len(),
            singletons.len(),
            budget,
            |l, r| {
                let (id, last, motion) = &trajectories[l];
                let new = &singletons[r];
                if new.jd - last.jd < EPS {
                    return None;
                }
                let cost = matcher.projected(last, motion, new)?;
                Some(candidate(l, r, id.0, new.candid, cost))
            },
        )?;

        let links = resolve_one_to_one(found);
        let consumed = links.iter().map(|c| c.right).collect::<Vec<_>>();
        for link in &links {
            let id = trajectories[link.left].0;
            store.record_update(id, [singletons[link.right].clone()])?;
        }
        outcome.counts.trajectories_with_new_observations = links.len();
        singletons = remove_indices(singletons, &consumed);
    }

    if stages.tracklets_with_old_observations && !tracklets.is_empty() {
        let old: Vec<Observation> = store.pool_observations().cloned().collect();
        let found = collect_candidates(
            workers,
            "tracklets_with_old_observations",
            tracklets.len(),
            old.len(),
            budget,
            |l, r| {
                let tracklet = &tracklets[l];
                let first = tracklet.first();
                let previous = &old[r];
                if first.jd - previous.jd < EPS {
                    return None;
                }
                let cost = matcher.projected(first, &tracklet.motion(), previous)?;
                Some(candidate(l, r, first.candid, previous.candid, cost))
            },
        )?;

        let links = resolve_one_to_one(found);
        let consumed = links.iter().map(|c| c.left).collect::<Vec<_>>();
        for link in &links {
            let taken = store.take_pool(&[old[link.right].candid]);
            let observations = taken
                .into_iter()
                .chain(tracklets[link.left].observations().iter().cloned());
            outcome.new_trajectories.push(store.insert_new(observations)?);
        }
        outcome.counts.tracklets_with_old_observations = links.len();
        tracklets = remove_indices(tracklets, &consumed);
    }

    if stages.new_observations_with_old_observations && !singletons.is_empty() {
        let old: Vec<Observation> = store.pool_observations().cloned().collect();
        let found = collect_candidates(
            workers,
            "new_observations_with_old_observations",
            singletons.len(),
            old.len(),
            budget,
            |l, r| {
                let new = &singletons[l];
                let previous = &old[r];
                let cost = matcher.direct(previous, new)?;
                Some(candidate(l, r, new.candid, previous.candid, cost))
            },
        )?;

        let links = resolve_one_to_one(found);
        let consumed = links.iter().map(|c| c.left).collect::<Vec<_>>();
        for link in &links {
            let taken = store.take_pool(&[old[link.right].candid]);
            let observations = taken
                .into_iter()
                .chain(std::iter::once(singletons[link.left].clone()));
            outcome.new_trajectories.push(store.insert_new(observations)?);
        }
        outcome.counts.new_observations_with_old_observations = links.len();
        singletons = remove_indices(singletons, &consumed);
    }

    for tracklet in tracklets {
        outcome
            .new_trajectories
            .push(store.insert_new(tracklet.into_observations())?);
    }
    outcome.leftover = singletons;

    debug!(
        links = outcome.counts.total(),
        new_trajectories = outcome.new_trajectories.len(),
        leftover = outcome.leftover.len(),
        "inter-night linking done"
    );
    Ok(outcome)
}

/// Drop the items at `indices`, keeping the order of the others.
fn remove_indices<T>(items: Vec<T>, indices: &[usize]) -> Vec<T> {
    if indices.is_empty() {
        return items;
    }
    let mut drop = vec![false; items.len()];
    indices.iter().for_each(|&i| drop[i] = true);
    items
        .into_iter()
        .zip(drop)
        .filter_map(|(item, dropped)| (!dropped).then_some(item))
        .collect()
}
