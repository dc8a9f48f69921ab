//! # Association primitives
//!
//! Building blocks shared by the intra-night clustering and the inter-night linker:
//!
//! * [`PhotometricRule`] – filter-dependent magnitude-difference check. Within a night the
//!   raw difference is compared with the cap; across nights the difference is turned into
//!   a rate `|Δmag| / max(Δt, 1 day)` before the comparison.
//! * [`AssociationCandidate`] – a proposed pairing with its [`MatchCost`], totally ordered
//!   so that every tie is settled the same way on every run.
//! * [`resolve_one_to_one`] – greedy global resolution of a candidate list into disjoint
//!   pairs, cheapest first.
//!
//! ## Matching cost
//!
//! ```text
//! cost = separation / separation_limit + magdiff / magdiff_limit
//! ```
//!
//! Both terms are normalised by their own limit, so an accepted candidate has
//! `cost ≤ 2`. Candidates are compared by `(cost, separation, left key, right key)`.
//!
//! ## See also
//! * [`intra_night`] – pairwise chaining of same-night detections.
//! * [`dbscan`] – density clustering alternative.
//! * [`inter_night`] – the four inter-night stages.
pub mod dbscan;
pub mod inter_night;
pub mod intra_night;

use std::cmp::Ordering;

use ahash::AHashSet;
use ordered_float::OrderedFloat;

use crate::{
    config::AssocParams,
    constants::{Degree, EPS, MIN_RATE_INTERVAL},
    observations::Observation,
};

/// Filter-dependent magnitude check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotometricRule {
    pub same_fid_limit: f64,
    pub diff_fid_limit: f64,
    /// Divide the difference by the elapsed time (floored at one day).
    pub per_day: bool,
}

impl PhotometricRule {
    pub fn intra_night(params: &AssocParams) -> Self {
        PhotometricRule {
            same_fid_limit: params.intra_night_magdiff_limit_same_fid,
            diff_fid_limit: params.intra_night_magdiff_limit_diff_fid,
            per_day: false,
        }
    }

    pub fn inter_night(params: &AssocParams) -> Self {
        PhotometricRule {
            same_fid_limit: params.inter_night_magdiff_limit_same_fid,
            diff_fid_limit: params.inter_night_magdiff_limit_diff_fid,
            per_day: true,
        }
    }

    /// Cap applying to the pair `(a, b)`.
    pub fn limit(&self, a: &Observation, b: &Observation) -> f64 {
        if a.fid == b.fid {
            self.same_fid_limit
        } else {
            self.diff_fid_limit
        }
    }

    /// The quantity compared with [`limit`](Self::limit).
    pub fn magdiff(&self, a: &Observation, b: &Observation) -> f64 {
        let diff = a.magdiff(b);
        if self.per_day {
            diff / (b.jd - a.jd).abs().max(MIN_RATE_INTERVAL)
        } else {
            diff
        }
    }

    /// Return the (possibly rate-normalised) difference when the pair passes the cap.
    pub fn check(&self, a: &Observation, b: &Observation) -> Option<f64> {
        let magdiff = self.magdiff(a, b);
        (magdiff <= self.limit(a, b)).then_some(magdiff)
    }

    /// Magnitude term of the matching cost, normalised by the applicable cap.
    pub fn normalised(&self, a: &Observation, b: &Observation, magdiff: f64) -> f64 {
        normalise(magdiff, self.limit(a, b))
    }
}

/// `value / limit`, zero when the limit is zero (the value then passed only if it was zero).
#[inline]
pub(crate) fn normalise(value: f64, limit: f64) -> f64 {
    if limit > EPS {
        value / limit
    } else {
        0.0
    }
}

/// Scalar matching cost of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MatchCost {
    pub cost: OrderedFloat<f64>,
    pub separation: OrderedFloat<f64>,
}

impl MatchCost {
    pub fn new(separation: Degree, separation_limit: Degree, normalised_magdiff: f64) -> Self {
        MatchCost {
            cost: OrderedFloat(normalise(separation, separation_limit) + normalised_magdiff),
            separation: OrderedFloat(separation),
        }
    }
}

/// A proposed pairing between a `left` item (trajectory, tracklet, observation) and a
/// `right` item (the thing it would absorb), valid for one stage only.
///
/// `left`/`right` index the stage's input lists; `left_key`/`right_key` are stable ids
/// (trajectory id, tracklet index, detection id) used to break exact cost ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociationCandidate {
    pub left: usize,
    pub right: usize,
    pub left_key: u64,
    pub right_key: u64,
    pub cost: MatchCost,
}

impl Ord for AssociationCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .cmp(&other.cost)
            .then_with(|| self.left_key.cmp(&other.left_key))
            .then_with(|| self.right_key.cmp(&other.right_key))
            .then_with(|| self.left.cmp(&other.left))
            .then_with(|| self.right.cmp(&other.right))
    }
}

impl PartialOrd for AssociationCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Resolve candidates into disjoint pairs.
///
/// Candidates are visited cheapest first; a candidate is kept when neither of its sides
/// has been used by a cheaper one. Each left item therefore gets its cheapest candidate
/// that is still available, and the rejected right items stay free for later stages.
///
/// Return
/// ------
/// * the kept candidates, in acceptance order.
pub fn resolve_one_to_one(mut candidates: Vec<AssociationCandidate>) -> Vec<AssociationCandidate> {
    candidates.sort_unstable();
    let mut used_left = AHashSet::new();
    let mut used_right = AHashSet::new();
    candidates
        .into_iter()
        .filter(|c| {
            if used_left.contains(&c.left) || used_right.contains(&c.right) {
                return false;
            }
            used_left.insert(c.left);
            used_right.insert(c.right);
            true
        })
        .collect()
}

#[cfg(test)]
mod associations_test {
    use super::*;

    fn obs(candid: u64, jd: f64, mag: f64, fid: u8) -> Observation {
        Observation::new(candid, 10.0, 10.0, jd, mag, fid, 1)
    }

    fn candidate(left: usize, right: usize, cost: f64, sep: f64) -> AssociationCandidate {
        AssociationCandidate {
            left,
            right,
            left_key: left as u64,
            right_key: right as u64,
            cost: MatchCost {
                cost: OrderedFloat(cost),
                separation: OrderedFloat(sep),
            },
        }
    }

    #[test]
    fn test_photometric_rule_intra() {
        let rule = PhotometricRule {
            same_fid_limit: 0.1,
            diff_fid_limit: 0.5,
            per_day: false,
        };
        assert!(rule.check(&obs(1, 0.0, 18.0, 1), &obs(2, 0.01, 18.05, 1)).is_some());
        assert!(rule.check(&obs(1, 0.0, 18.0, 1), &obs(2, 0.01, 18.3, 1)).is_none());
        // cross-filter pairs use the looser cap
        assert!(rule.check(&obs(1, 0.0, 18.0, 1), &obs(2, 0.01, 18.3, 2)).is_some());
    }

    #[test]
    fn test_photometric_rule_rate() {
        let rule = PhotometricRule {
            same_fid_limit: 0.1,
            diff_fid_limit: 0.5,
            per_day: true,
        };
        // 0.4 mag over 5 nights is 0.08 mag/day
        let rate = rule.check(&obs(1, 0.0, 18.0, 1), &obs(2, 5.0, 18.4, 1)).unwrap();
        assert!((rate - 0.08).abs() < 1e-12);
        // gaps under a day are not divided
        assert!(rule.check(&obs(1, 0.0, 18.0, 1), &obs(2, 0.5, 18.4, 1)).is_none());
    }

    #[test]
    fn test_resolve_one_to_one() {
        let kept = resolve_one_to_one(vec![
            candidate(0, 0, 0.5, 0.1),
            candidate(0, 1, 0.2, 0.1),
            candidate(1, 1, 0.3, 0.1),
            candidate(1, 0, 0.9, 0.1),
        ]);
        let pairs: Vec<_> = kept.iter().map(|c| (c.left, c.right)).collect();
        assert_eq!(pairs, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn test_tie_break_is_deterministic() {
        let kept = resolve_one_to_one(vec![candidate(1, 0, 0.5, 0.1), candidate(0, 0, 0.5, 0.1)]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].left, 0);
    }
}
