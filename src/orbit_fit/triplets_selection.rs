//! Triplet selection for the orbit validation.
//!
//! This module provides tools to:
//! - Downsample a long trajectory to a representative subset,
//! - Score triplets with a weight that favors well-spaced epochs,
//! - Keep the best triplets with a bounded heap,
//! - Derive the deterministic noise seed of a solver trial.
//!
//! The selection only depends on the epochs of the detections, so a given trajectory
//! always yields the same triplets in the same order.
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::{constants::TrajectoryId, observations::Observation};

/// Internal structure used to store a weighted observation triplet during
/// the selection process.
#[derive(Debug)]
struct WeightedTriplet {
    weight: f64,
    i: usize,
    j: usize,
    k: usize,
}

// Max-heap on (weight, i, j, k): the worst triplet is on top, ready to be pruned.
impl Eq for WeightedTriplet {}
impl PartialEq for WeightedTriplet {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Ord for WeightedTriplet {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight
            .total_cmp(&other.weight)
            .then_with(|| (self.i, self.j, self.k).cmp(&(other.i, other.j, other.k)))
    }
}
impl PartialOrd for WeightedTriplet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compute the "weight" of a triplet based on time spacing.
///
/// The weight is low when the intervals between observations are close
/// to the `dtw` (optimal interval), and larger when the intervals are
/// unbalanced or far from `dtw`.
///
/// # Arguments
/// * `time1`, `time2`, `time3` - epochs of the three observations (JD).
/// * `dtw` - Optimal desired time spacing between consecutive observations.
///
/// # Returns
/// A floating-point score (lower is better).
pub(crate) fn triplet_weight(time1: f64, time2: f64, time3: f64, dtw: f64) -> f64 {
    fn s3dtw(dt: f64, dtw: f64) -> f64 {
        if dt <= dtw {
            dtw / dt
        } else {
            1.0 + dt / dtw
        }
    }

    s3dtw(time2 - time1, dtw) + s3dtw(time3 - time2, dtw)
}

/// Downsample `n` time-sorted observations to at most `max_keep` indices.
///
/// The first and last observations are always kept, the others are spread uniformly.
///
/// * If `max_keep <= 3`, the first, middle, and last indices are returned.
/// * If `max_keep >= n`, all indices are returned.
pub(crate) fn downsample_uniform_with_edges_indices(n: usize, max_keep: usize) -> Vec<usize> {
    match n {
        0 => Vec::new(),
        _ if max_keep >= n => (0..n).collect(),
        _ if max_keep <= 3 => vec![0, n / 2, n - 1],
        _ => {
            let slots = max_keep - 2;
            std::iter::once(0)
                .chain((0..slots).map(move |i| {
                    let fraction = (i + 1) as f64 / (slots + 1) as f64;
                    1 + (fraction * (n - 2) as f64).floor() as usize
                }))
                .chain(std::iter::once(n - 1))
                .collect()
        }
    }
}

/// Select the best triplets of a time-sorted trajectory.
///
/// 1. **Downsampling** – at most `max_obs_for_triplets` observations are kept (first and
///    last always included).
/// 2. **Enumeration** – every `i < j < k` of the reduced set is scored with
///    [`triplet_weight`] against `optimal_interval_time`.
/// 3. **Selection** – a bounded max-heap keeps the `n_triplets` lowest weights; exact ties
///    are settled by the indices.
///
/// # Arguments
/// * `observations` - detections sorted by epoch, strictly increasing.
/// * `optimal_interval_time` - target spacing (days) inside a triplet.
/// * `max_obs_for_triplets` - downsampling cap.
/// * `n_triplets` - number of triplets to return.
///
/// # Returns
/// Indices into `observations`, best triplet first. Empty when fewer than three
/// observations are given.
pub fn select_triplets(
    observations: &[Observation],
    optimal_interval_time: f64,
    max_obs_for_triplets: usize,
    n_triplets: usize,
) -> Vec<[usize; 3]> {
    if observations.len() < 3 || n_triplets == 0 {
        return Vec::new();
    }
    let selected = downsample_uniform_with_edges_indices(observations.len(), max_obs_for_triplets);
    let times: Vec<f64> = selected.iter().map(|&i| observations[i].jd).collect();
    let n = times.len();

    let mut heap = BinaryHeap::with_capacity(n_triplets + 1);
    for i in 0..n {
        for j in i + 1..n {
            for k in j + 1..n {
                let wt = WeightedTriplet {
                    weight: triplet_weight(times[i], times[j], times[k], optimal_interval_time),
                    i,
                    j,
                    k,
                };
                if heap.len() < n_triplets {
                    heap.push(wt);
                } else if heap.peek().is_some_and(|top| wt < *top) {
                    heap.pop();
                    heap.push(wt);
                }
            }
        }
    }

    heap.into_sorted_vec()
        .into_iter()
        .map(|wt| [selected[wt.i], selected[wt.j], selected[wt.k]])
        .collect()
}

/// Seed of the noise draw for one solver trial.
///
/// SplitMix64 finalizer over the trajectory id, the triplet rank and the trial index, so
/// that every trial of every run gets the same, well-spread seed.
pub fn noise_seed(id: TrajectoryId, triplet: usize, trial: u32) -> u64 {
    let mut z = id
        .0
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add((triplet as u64) << 32)
        .wrapping_add(trial as u64);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod triplets_selection_test {
    use super::*;
    use approx::assert_relative_eq;

    fn obs_at(times: &[f64]) -> Vec<Observation> {
        times
            .iter()
            .enumerate()
            .map(|(i, &jd)| Observation::new(i as u64, 10.0, 0.0, jd, 18.0, 1, 1))
            .collect()
    }

    #[test]
    fn test_triplet_weight() {
        // perfectly spaced triplet
        assert_relative_eq!(triplet_weight(0.0, 1.0, 2.0, 1.0), 2.0);
        // short first interval is penalized
        assert_relative_eq!(triplet_weight(0.0, 0.5, 1.5, 1.0), 3.0);
        // long intervals grow linearly
        assert_relative_eq!(triplet_weight(0.0, 3.0, 6.0, 1.0), 8.0);
    }

    #[test]
    fn test_downsample() {
        assert!(downsample_uniform_with_edges_indices(0, 5).is_empty());
        assert_eq!(downsample_uniform_with_edges_indices(4, 10), vec![0, 1, 2, 3]);
        assert_eq!(downsample_uniform_with_edges_indices(10, 2), vec![0, 5, 9]);
        let idx = downsample_uniform_with_edges_indices(100, 5);
        assert_eq!(idx.len(), 5);
        assert_eq!(idx[0], 0);
        assert_eq!(idx[4], 99);
        assert!(idx.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_select_triplets() {
        let obs = obs_at(&[0.0, 0.01, 1.0, 2.0, 2.01]);
        let triplets = select_triplets(&obs, 1.0, 100, 2);
        assert_eq!(triplets.len(), 2);
        // one-day spacing first, then the nearly even 0.99 / 1 day triplet
        assert_eq!(triplets[0], [0, 2, 3]);
        assert_eq!(triplets[1], [1, 2, 3]);

        assert!(select_triplets(&obs[..2], 1.0, 100, 2).is_empty());
        assert_eq!(select_triplets(&obs[..3], 1.0, 100, 10), vec![[0, 1, 2]]);
    }

    #[test]
    fn test_noise_seed() {
        let a = noise_seed(TrajectoryId(7), 0, 1);
        assert_eq!(a, noise_seed(TrajectoryId(7), 0, 1));
        assert_ne!(a, noise_seed(TrajectoryId(7), 0, 2));
        assert_ne!(a, noise_seed(TrajectoryId(7), 1, 1));
        assert_ne!(a, noise_seed(TrajectoryId(8), 0, 1));
    }
}
