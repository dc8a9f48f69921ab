mod common;

use camino::Utf8Path;
use rand::{rngs::StdRng, Rng, SeedableRng};

use asterlink::associations::intra_night::{cluster_night, IntraNightResult};
use asterlink::associations::PhotometricRule;
use asterlink::constants::{CandId, ARCSEC_PER_DEG};
use asterlink::observations::batch_reader::read_night_csv;
use asterlink::observations::Observation;

fn groups(result: &IntraNightResult) -> Vec<Vec<CandId>> {
    result
        .tracklets
        .iter()
        .map(|t| t.observations().iter().map(|o| o.candid).collect())
        .collect()
}

#[test]
fn test_read_and_cluster_night() {
    let batch = read_night_csv(Utf8Path::new("tests/data/ztf_night_12.csv"), 12).unwrap();
    // the night 13 row is dropped, the malformed row skipped
    assert_eq!(batch.len(), 6);
    batch.validate().unwrap();

    let params = common::config().assoc_params;
    let result = cluster_night(&batch.observations, &params);
    assert_eq!(groups(&result), vec![vec![1201, 1202, 1203], vec![1204, 1205]]);
    assert_eq!(result.singletons.len(), 1);
    assert_eq!(result.singletons[0].candid, 1206);
    assert_eq!(result.n_tracklet_observations(), 5);

    let mut dbscan = params.clone();
    dbscan.use_dbscan = true;
    let result_dbscan = cluster_night(&batch.observations, &dbscan);
    assert_eq!(groups(&result_dbscan), groups(&result));
    assert_eq!(result_dbscan.singletons, result.singletons);
}

#[test]
fn test_compatible_pairs_never_split() {
    let batch = read_night_csv(Utf8Path::new("tests/data/ztf_night_12.csv"), 12).unwrap();
    let params = common::config().assoc_params;
    let rule = PhotometricRule::intra_night(&params);
    let max_sep = params.intra_night_separation / ARCSEC_PER_DEG;
    let result = cluster_night(&batch.observations, &params);

    let tracklet_of = |candid: CandId| {
        result
            .tracklets
            .iter()
            .position(|t| t.observations().iter().any(|o| o.candid == candid))
    };

    let obs = &batch.observations;
    for (i, a) in obs.iter().enumerate() {
        for b in &obs[i + 1..] {
            if a.jd != b.jd && a.separation(b) <= max_sep && rule.check(a, b).is_some() {
                assert!(tracklet_of(a.candid).is_some());
                assert_eq!(tracklet_of(a.candid), tracklet_of(b.candid));
            }
        }
    }
}

#[test]
fn test_magnitude_caps() {
    let mut params = common::config().assoc_params;
    params.intra_night_separation = 5.0;
    params.intra_night_magdiff_limit_same_fid = 0.1;
    params.intra_night_magdiff_limit_diff_fid = 0.5;
    let three_arcsec = 3.0 / ARCSEC_PER_DEG;

    let pair = |mag: f64, fid: u8| {
        [
            Observation::new(1, 200.0, 0.0, 2459370.70, 18.0, 1, 12),
            Observation::new(2, 200.0 + three_arcsec, 0.0, 2459370.71, mag, fid, 12),
        ]
    };

    for use_dbscan in [false, true] {
        params.use_dbscan = use_dbscan;
        assert_eq!(cluster_night(&pair(18.05, 1), &params).tracklets.len(), 1);

        let split = cluster_night(&pair(18.3, 1), &params);
        assert!(split.tracklets.is_empty());
        assert_eq!(split.singletons.len(), 2);

        // the cross-filter cap is looser
        assert_eq!(cluster_night(&pair(18.3, 2), &params).tracklets.len(), 1);
    }
}

#[test]
fn test_every_accepted_pair_shares_a_tracklet_on_a_crowded_field() {
    let mut params = common::config().assoc_params;
    params.intra_night_separation = 5.0;
    params.intra_night_magdiff_limit_same_fid = 0.1;
    params.intra_night_magdiff_limit_diff_fid = 0.3;
    let rule = PhotometricRule::intra_night(&params);
    let max_sep = params.intra_night_separation / ARCSEC_PER_DEG;

    // 150 detections in a 40 arcsec box, one epoch each
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let night: Vec<Observation> = (0..150u64)
        .map(|k| {
            Observation::new(
                k + 1,
                80.0 + rng.random_range(0.0..40.0) / ARCSEC_PER_DEG,
                20.0 + rng.random_range(0.0..40.0) / ARCSEC_PER_DEG,
                2459370.60 + 0.0005 * k as f64,
                18.0 + rng.random_range(-0.2..0.2),
                rng.random_range(1..=2),
                12,
            )
        })
        .collect();

    let pairwise = cluster_night(&night, &params);
    let mut dbscan = params.clone();
    dbscan.use_dbscan = true;
    let density = cluster_night(&night, &dbscan);
    assert_eq!(groups(&density), groups(&pairwise));

    let tracklet_of = |candid: CandId| {
        pairwise
            .tracklets
            .iter()
            .position(|t| t.observations().iter().any(|o| o.candid == candid))
    };

    let mut n_pairs = 0;
    for (i, a) in night.iter().enumerate() {
        for b in &night[i + 1..] {
            if a.separation(b) <= max_sep && rule.check(a, b).is_some() {
                n_pairs += 1;
                assert!(tracklet_of(a.candid).is_some(), "{} left alone", a.candid);
                assert_eq!(
                    tracklet_of(a.candid),
                    tracklet_of(b.candid),
                    "{} and {} split",
                    a.candid,
                    b.candid
                );
            }
        }
    }
    assert!(n_pairs > 0);
}
