#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use approx::assert_relative_eq;
use asterlink::asterlink_errors::AsterlinkError;
use asterlink::config::Config;
use asterlink::constants::NightId;
use asterlink::observations::{NightBatch, Observation};
use asterlink::orbit_fit::keplerian_element::KeplerianElements;
use asterlink::orbit_fit::{OrbitSolution, OrbitSolver, SolverRequest};
use asterlink::trajectories::association_sink::{AssociationSink, TrajectoryRecord};

pub const CONFIG: &str = r#"
[ASSOC_PARAMS]
intra_night_separation = 145.0
intra_night_magdiff_limit_same_fid = 2.21
intra_night_magdiff_limit_diff_fid = 1.75
inter_night_separation = 0.3
inter_night_magdiff_limit_same_fid = 0.1
inter_night_magdiff_limit_diff_fid = 0.5
maximum_angle = 1.0
use_dbscan = false

[TW_PARAMS]
trajectory_keep_limit = 15
old_observation_keep_limit = 2
trajectory_2_points_keep_limit = 8

[SOLVE_ORBIT_PARAMS]
n_triplets = 2
noise_ntrials = 3
orbfit_limit = 6
orbfit_min_points = 6
prop_epoch = 2459000.5
solver_timeout_ms = 5000

[ASSOC_SYSTEM]
tracklets_with_trajectories = true
trajectories_with_new_observations = true
tracklets_with_old_observations = true
new_observations_with_old_observations = true

[RESOURCES]
cpu_count = 2
max_core = 4
executor_core = 1
executor_memory = "64M"
driver_memory = "64M"

[OUTPUT]
association_output_file = "fink_fat_out"
"#;

pub fn config() -> Config {
    Config::from_toml_str(CONFIG).unwrap()
}

/// Epoch of the first detection of night `nid`.
pub fn night_start(nid: NightId) -> f64 {
    2459357.6 + nid as f64
}

/// Detections of `n_objects` objects moving 0.1°/day in RA, one degree apart in Dec,
/// seen twice per night 30 minutes apart.
///
/// Candids are `nid * 1000 + object * 10 + k`.
pub fn moving_objects(nid: NightId, n_objects: usize) -> Vec<Observation> {
    let mut observations = Vec::new();
    for object in 0..n_objects {
        for k in 0..2 {
            let jd = night_start(nid) + 0.02 * k as f64;
            let ra = 10.0 + 0.1 * (jd - night_start(0));
            observations.push(Observation::new(
                nid as u64 * 1000 + object as u64 * 10 + k,
                ra,
                object as f64,
                jd,
                18.0,
                1,
                nid,
            ));
        }
    }
    observations
}

pub fn night(nid: NightId, n_objects: usize) -> NightBatch {
    NightBatch::new(nid, moving_objects(nid, n_objects))
}

pub fn elements(a: f64, e: f64) -> KeplerianElements {
    KeplerianElements {
        reference_epoch: 2459000.5,
        semi_major_axis: a,
        eccentricity: e,
        inclination: 7.0,
        ascending_node_longitude: 120.0,
        periapsis_argument: 45.0,
        mean_anomaly: 200.0,
    }
}

/// Converges on every call.
pub struct ConvergingSolver;

impl OrbitSolver for ConvergingSolver {
    fn solve(&self, _request: &SolverRequest) -> Result<OrbitSolution, AsterlinkError> {
        Ok(OrbitSolution {
            elements: elements(2.7, 0.12),
            residual_rms: Some(0.4),
        })
    }
}

/// Never converges.
pub struct DivergingSolver;

impl OrbitSolver for DivergingSolver {
    fn solve(&self, request: &SolverRequest) -> Result<OrbitSolution, AsterlinkError> {
        Err(AsterlinkError::SolverFailure(format!(
            "no convergence for {}",
            request.designation
        )))
    }
}

/// Answers after `delay`.
pub struct SlowSolver {
    pub delay: Duration,
}

impl OrbitSolver for SlowSolver {
    fn solve(&self, _request: &SolverRequest) -> Result<OrbitSolution, AsterlinkError> {
        std::thread::sleep(self.delay);
        Ok(OrbitSolution {
            elements: elements(2.7, 0.12),
            residual_rms: None,
        })
    }
}

/// Keeps every emitted night in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    pub emitted: Arc<Mutex<Vec<(NightId, Vec<TrajectoryRecord>)>>>,
}

impl MemorySink {
    pub fn last(&self) -> Option<(NightId, Vec<TrajectoryRecord>)> {
        self.emitted.lock().unwrap().last().cloned()
    }

    pub fn nights(&self) -> Vec<NightId> {
        self.emitted.lock().unwrap().iter().map(|(nid, _)| *nid).collect()
    }
}

impl AssociationSink for MemorySink {
    fn emit(&mut self, nid: NightId, records: &[TrajectoryRecord]) -> Result<(), AsterlinkError> {
        self.emitted.lock().unwrap().push((nid, records.to_vec()));
        Ok(())
    }
}

pub fn assert_orbit_close(actual: &KeplerianElements, expected: &KeplerianElements, epsilon: f64) {
    assert_relative_eq!(
        actual.reference_epoch,
        expected.reference_epoch,
        epsilon = epsilon
    );
    assert_relative_eq!(
        actual.semi_major_axis,
        expected.semi_major_axis,
        epsilon = epsilon
    );
    assert_relative_eq!(
        actual.eccentricity,
        expected.eccentricity,
        epsilon = epsilon
    );
    assert_relative_eq!(actual.inclination, expected.inclination, epsilon = epsilon);
    assert_relative_eq!(
        actual.ascending_node_longitude,
        expected.ascending_node_longitude,
        epsilon = epsilon
    );
    assert_relative_eq!(
        actual.periapsis_argument,
        expected.periapsis_argument,
        epsilon = epsilon
    );
    assert_relative_eq!(
        actual.mean_anomaly,
        expected.mean_anomaly,
        epsilon = epsilon
    );
}
