//! Density clustering of same-night detections.
//!
//! DBSCAN over the sky positions of one night with `eps = intra_night_separation` and
//! `min_pts = 2` (a detection counts in its own neighbourhood). Two detections are
//! neighbours when they share the night number and lie within `eps` of each other.
//!
//! A density cluster is not yet a tracklet: its members are linked with the intra-night
//! pair rule (distinct epochs, photometric check) exactly as the pairwise mode does, so
//! both modes agree on the same input. Noise points are returned as singletons.
use std::collections::VecDeque;

use itertools::Itertools;

use crate::{
    associations::intra_night::{link_members, IntraNightResult, PairRule},
    config::AssocParams,
    constants::{Degree, ARCSEC_PER_DEG},
    observations::Observation,
};

const MIN_PTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Unvisited,
    Noise,
    Cluster(usize),
}

/// Indices of the neighbours of `idx` (itself included).
///
/// `by_dec` holds the indices sorted by declination so that only a declination band of
/// width `2·eps` needs to be scanned.
fn region_query(points: &[Observation], by_dec: &[usize], idx: usize, eps: Degree) -> Vec<usize> {
    let center = &points[idx];
    let lower = by_dec.partition_point(|&i| points[i].dec < center.dec - eps);
    by_dec[lower..]
        .iter()
        .take_while(|&&i| points[i].dec <= center.dec + eps)
        .copied()
        .filter(|&i| points[i].nid == center.nid && center.separation(&points[i]) <= eps)
        .collect()
}

/// Raw DBSCAN labelling; returns the clusters as lists of indices, in discovery order.
pub(crate) fn dbscan_indices(points: &[Observation], eps: Degree, min_pts: usize) -> Vec<Vec<usize>> {
    let by_dec: Vec<usize> = (0..points.len())
        .sorted_by(|&a, &b| points[a].dec.total_cmp(&points[b].dec))
        .collect();

    let mut labels = vec![Label::Unvisited; points.len()];
    let mut clusters: Vec<Vec<usize>> = Vec::new();

    for start in 0..points.len() {
        if labels[start] != Label::Unvisited {
            continue;
        }
        let neighbours = region_query(points, &by_dec, start, eps);
        if neighbours.len() < min_pts {
            labels[start] = Label::Noise;
            continue;
        }

        let cluster_id = clusters.len();
        let mut members = vec![start];
        labels[start] = Label::Cluster(cluster_id);
        let mut queue: VecDeque<usize> = neighbours.into_iter().collect();

        while let Some(current) = queue.pop_front() {
            match labels[current] {
                Label::Cluster(_) => continue,
                Label::Noise => {
                    // border point
                    labels[current] = Label::Cluster(cluster_id);
                    members.push(current);
                    continue;
                }
                Label::Unvisited => {
                    labels[current] = Label::Cluster(cluster_id);
                    members.push(current);
                }
            }
            let expansion = region_query(points, &by_dec, current, eps);
            if expansion.len() >= min_pts {
                queue.extend(
                    expansion
                        .into_iter()
                        .filter(|&i| !matches!(labels[i], Label::Cluster(_))),
                );
            }
        }
        clusters.push(members);
    }
    clusters
}

/// Cluster one night of detections with DBSCAN.
pub fn cluster(observations: &[Observation], params: &AssocParams) -> IntraNightResult {
    let points: Vec<Observation> = observations
        .iter()
        .cloned()
        .sorted_by(Observation::time_order)
        .collect();
    let eps = params.intra_night_separation / ARCSEC_PER_DEG;
    let rule = PairRule::new(params);

    let clusters = dbscan_indices(&points, eps, MIN_PTS);

    let mut in_cluster = vec![false; points.len()];
    let mut chains: Vec<Vec<Observation>> = Vec::with_capacity(clusters.len());

    for members in clusters {
        members.iter().for_each(|&idx| in_cluster[idx] = true);
        // indices were assigned in time order
        let members: Vec<usize> = members.into_iter().sorted().collect();
        chains.extend(link_members(&points, &members, &rule));
    }

    chains.extend(
        points
            .iter()
            .zip(&in_cluster)
            .filter(|(_, &used)| !used)
            .map(|(obs, _)| vec![obs.clone()]),
    );

    IntraNightResult::from_chains(chains)
}
