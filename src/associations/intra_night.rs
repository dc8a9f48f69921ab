//! # Intra-night clustering
//!
//! Groups the detections of one night into [`Tracklet`]s.
//!
//! ## Pairwise linking (default)
//!
//! Two detections form an accepted pair when they
//!
//! * belong to the same night and were taken at different epochs,
//! * lie within `intra_night_separation` (arcsec),
//! * pass the intra-night [`PhotometricRule`].
//!
//! Tracklets are the connected components of the accepted-pair graph, ordered by
//! `(jd, candid)`: the two members of an accepted pair always end up in the same
//! tracklet. The only exception is a component holding two detections of the same
//! epoch, which cannot be one strictly time-ordered chain. The detection of that epoch
//! with the smallest mean magnitude difference to its partners stays (ties: smallest
//! candid); the others are set aside, the remaining graph is linked again, and the
//! set-aside detections are linked among themselves in a further round.
//!
//! Components of a single detection are returned as singletons.
//!
//! ## Density clustering
//!
//! With `use_dbscan = true` the candidate groups come from [`dbscan`](super::dbscan)
//! and are refined with the same pair rule; the output has the same shape.
use std::collections::BTreeMap;

use ahash::AHashSet;
use itertools::Itertools;
use ordered_float::OrderedFloat;
use tracing::debug;

use crate::{
    associations::{dbscan, PhotometricRule},
    config::AssocParams,
    constants::{Degree, ARCSEC_PER_DEG},
    observations::{tracklet::Tracklet, Observation},
};

/// Output of the intra-night clustering of one night.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntraNightResult {
    /// Tracklets ordered by their first detection.
    pub tracklets: Vec<Tracklet>,
    /// Detections that joined no tracklet, in time order.
    pub singletons: Vec<Observation>,
}

impl IntraNightResult {
    /// Split a list of chains into tracklets and singletons.
    pub(crate) fn from_chains(mut chains: Vec<Vec<Observation>>) -> Self {
        chains.sort_by(|a, b| match (a.first(), b.first()) {
            (Some(a), Some(b)) => Observation::time_order(a, b),
            _ => a.len().cmp(&b.len()),
        });
        let mut result = IntraNightResult::default();
        for chain in chains {
            if chain.len() >= 2 {
                let index = result.tracklets.len();
                if let Some(tracklet) = Tracklet::new(index, chain) {
                    result.tracklets.push(tracklet);
                }
            } else {
                result.singletons.extend(chain);
            }
        }
        result.singletons.sort_by(Observation::time_order);
        result
    }

    pub fn n_tracklet_observations(&self) -> usize {
        self.tracklets.iter().map(Tracklet::len).sum()
    }
}

/// Disjoint sets over `0..n`, path halving on `find`.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        UnionFind {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        // the smaller root survives so component ids follow the input order
        if ra < rb {
            self.parent[rb] = ra;
        } else if rb < ra {
            self.parent[ra] = rb;
        }
    }
}

/// Pair acceptance shared by both clustering modes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PairRule {
    photometry: PhotometricRule,
    max_sep: Degree,
}

impl PairRule {
    pub(crate) fn new(params: &AssocParams) -> Self {
        PairRule {
            photometry: PhotometricRule::intra_night(params),
            max_sep: params.intra_night_separation / ARCSEC_PER_DEG,
        }
    }

    /// Magnitude difference of an accepted pair, `None` otherwise.
    pub(crate) fn accept(&self, a: &Observation, b: &Observation) -> Option<f64> {
        if a.nid != b.nid || a.jd == b.jd || a.separation(b) > self.max_sep {
            return None;
        }
        self.photometry.check(a, b)
    }
}

/// Connected components of the accepted-pair graph restricted to `members`.
///
/// `members` are indices into `points`; every component comes back sorted, and the
/// components are ordered by their smallest index.
fn connected_components(
    points: &[Observation],
    members: &[usize],
    rule: &PairRule,
) -> Vec<Vec<usize>> {
    let by_dec: Vec<usize> = (0..members.len())
        .sorted_by(|&a, &b| points[members[a]].dec.total_cmp(&points[members[b]].dec))
        .collect();

    let mut sets = UnionFind::new(members.len());
    for (rank, &a) in by_dec.iter().enumerate() {
        let left = &points[members[a]];
        for &b in by_dec[rank + 1..]
            .iter()
            .take_while(|&&b| points[members[b]].dec - left.dec <= rule.max_sep)
        {
            if rule.accept(left, &points[members[b]]).is_some() {
                sets.union(a, b);
            }
        }
    }

    let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (pos, &idx) in members.iter().enumerate() {
        let root = sets.find(pos);
        components.entry(root).or_default().push(idx);
    }
    components
        .into_values()
        .map(|component| component.into_iter().sorted().collect())
        .collect()
}

/// Detections of `component` that lose a same-epoch conflict.
///
/// `points` must be time-sorted so that equal epochs are adjacent in `component`.
fn epoch_conflict_losers(
    points: &[Observation],
    component: &[usize],
    rule: &PairRule,
) -> Vec<usize> {
    let mean_magdiff = |idx: usize| {
        let diffs: Vec<f64> = component
            .iter()
            .filter_map(|&other| rule.accept(&points[idx], &points[other]))
            .collect();
        if diffs.is_empty() {
            f64::INFINITY
        } else {
            diffs.iter().sum::<f64>() / diffs.len() as f64
        }
    };

    let losers: Vec<usize> = component
        .iter()
        .copied()
        .chunk_by(|&idx| OrderedFloat(points[idx].jd))
        .into_iter()
        .flat_map(|(_, epoch)| {
            let epoch: Vec<usize> = epoch.collect();
            if epoch.len() < 2 {
                return Vec::new();
            }
            let keep = epoch
                .iter()
                .copied()
                .min_by_key(|&idx| (OrderedFloat(mean_magdiff(idx)), points[idx].candid));
            epoch.into_iter().filter(|&idx| Some(idx) != keep).collect()
        })
        .collect();
    losers
}

/// Link `members` (sorted indices into the time-sorted `points`) into chains.
pub(crate) fn link_members(
    points: &[Observation],
    members: &[usize],
    rule: &PairRule,
) -> Vec<Vec<Observation>> {
    let mut chains = Vec::new();
    let mut pending = members.to_vec();

    while !pending.is_empty() {
        let mut active = pending;
        let mut deferred: Vec<usize> = Vec::new();
        let components = loop {
            let components = connected_components(points, &active, rule);
            let losers: AHashSet<usize> = components
                .iter()
                .flat_map(|component| epoch_conflict_losers(points, component, rule))
                .collect();
            if losers.is_empty() {
                break components;
            }
            active.retain(|idx| !losers.contains(idx));
            deferred.extend(losers);
        };
        chains.extend(
            components
                .into_iter()
                .map(|component| component.into_iter().map(|idx| points[idx].clone()).collect()),
        );
        deferred.sort_unstable();
        pending = deferred;
    }
    chains
}

/// Cluster the detections of one night with the configured method.
///
/// An empty input gives an empty result.
pub fn cluster_night(observations: &[Observation], params: &AssocParams) -> IntraNightResult {
    let result = if params.use_dbscan {
        dbscan::cluster(observations, params)
    } else {
        pairwise_chaining(observations, params)
    };
    debug!(
        n_observations = observations.len(),
        n_tracklets = result.tracklets.len(),
        n_singletons = result.singletons.len(),
        dbscan = params.use_dbscan,
        "intra-night clustering done"
    );
    result
}

/// Link same-night detections through their accepted pairs.
///
/// Arguments
/// ---------
/// * `observations`: the detections of one night, in any order
/// * `params`: separation (arcsec) and intra-night magnitude caps
///
/// Return
/// ------
/// * the tracklets and singletons of the night
pub fn pairwise_chaining(observations: &[Observation], params: &AssocParams) -> IntraNightResult {
    let points: Vec<Observation> = observations
        .iter()
        .cloned()
        .sorted_by(Observation::time_order)
        .collect();
    let members: Vec<usize> = (0..points.len()).collect();

    IntraNightResult::from_chains(link_members(&points, &members, &PairRule::new(params)))
}
