//! # Orbit fit adapter
//!
//! [`OrbitFitAdapter`] runs the triplet / noise-trial protocol of the orbit validation
//! against an [`OrbitSolver`] and summarizes it in a [`FitOutcome`].
//!
//! ## Protocol
//!
//! 1. Trajectories with fewer than three detections short-circuit: no solver call.
//! 2. Triplets come from [`select_triplets`], best first.
//! 3. Each triplet is submitted up to `noise_ntrials` times (trial 0 nominal, the others
//!    with a [`noise_seed`]); the total number of calls of the fit is capped by
//!    `orbfit_limit`.
//! 4. Every call runs on its own thread and is awaited for at most `solver_timeout_ms`.
//!    A late call is abandoned and counted as a timed-out failure. Its thread lives on
//!    until the solver returns; [`OrbitFitAdapter::abandoned_calls`] tracks how many do.
//! 5. The first stable triplet confirms the trajectory with its lowest-RMS valid solution.
//!
//! Solver errors never escape the adapter: they are failed trials. The only error returned
//! by [`OrbitFitAdapter::fit`] is a [`ResourceExhaustion`](AsterlinkError::ResourceExhaustion)
//! when a solver thread cannot be spawned.
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, warn};

use crate::{
    asterlink_errors::AsterlinkError,
    constants::{NightId, TrajectoryId},
    orbit_fit::{
        keplerian_element::KeplerianElements,
        triplets_selection::{noise_seed, select_triplets},
        OrbitFitParams, OrbitSolution, OrbitSolver, SolverRequest, Triplet,
    },
    trajectories::{designation::designation_or_id, FitRecord, Trajectory},
};

/// Summary of the orbit fit of one trajectory.
///
/// `failed` counts every executed trial that did not yield a valid orbit, timeouts
/// included; `timed_out` is the subset abandoned at the deadline.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    pub trajectory_id: TrajectoryId,
    pub elements: Option<KeplerianElements>,
    pub residual_rms: Option<f64>,
    pub trials_run: u32,
    pub converged: u32,
    pub failed: u32,
    pub timed_out: u32,
    /// Rank of the triplet that confirmed the trajectory.
    pub stable_triplet: Option<usize>,
}

impl FitOutcome {
    fn empty(trajectory_id: TrajectoryId) -> Self {
        FitOutcome {
            trajectory_id,
            elements: None,
            residual_rms: None,
            trials_run: 0,
            converged: 0,
            failed: 0,
            timed_out: 0,
            stable_triplet: None,
        }
    }

    pub fn success(&self) -> bool {
        self.elements.is_some()
    }

    /// Metadata kept on the trajectory.
    pub fn to_record(&self, nid: NightId, n_points: usize) -> FitRecord {
        FitRecord {
            nid,
            n_points,
            trials_run: self.trials_run,
            converged: self.converged,
            failed: self.failed,
            timed_out: self.timed_out,
            success: self.success(),
        }
    }
}

/// Lower RMS first, solutions without RMS last.
fn cmp_rms(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

const CALL_WAITING: u8 = 0;
const CALL_ABANDONED: u8 = 1;
const CALL_DONE: u8 = 2;

/// Marks a solver call done when its thread leaves, panics included, and releases the
/// abandoned-call slot the waiting side may have taken.
struct CallGuard {
    state: Arc<AtomicU8>,
    abandoned: Arc<AtomicUsize>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if self.state.swap(CALL_DONE, AtomicOrdering::SeqCst) == CALL_ABANDONED {
            self.abandoned.fetch_sub(1, AtomicOrdering::SeqCst);
        }
    }
}

/// Run one solver call on a dedicated thread and wait for it at most `timeout`.
///
/// The thread of a late call is detached and counted in `abandoned` until the solver
/// returns; its answer is dropped.
fn call_solver(
    solver: &Arc<dyn OrbitSolver>,
    request: SolverRequest,
    timeout: Duration,
    abandoned: &Arc<AtomicUsize>,
) -> Result<OrbitSolution, AsterlinkError> {
    let (tx, rx) = mpsc::channel();
    let solver = Arc::clone(solver);
    let state = Arc::new(AtomicU8::new(CALL_WAITING));
    let guard = CallGuard {
        state: Arc::clone(&state),
        abandoned: Arc::clone(abandoned),
    };
    let designation = request.designation.clone();

    thread::Builder::new()
        .name(format!("orbit-solver-{designation}"))
        .spawn(move || {
            let _guard = guard;
            // the receiver is gone after a timeout
            let _ = tx.send(solver.solve(&request));
        })
        .map_err(|err| {
            AsterlinkError::ResourceExhaustion(format!("cannot spawn a solver thread: {err}"))
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            abandoned.fetch_add(1, AtomicOrdering::SeqCst);
            let swapped = state.compare_exchange(
                CALL_WAITING,
                CALL_ABANDONED,
                AtomicOrdering::SeqCst,
                AtomicOrdering::SeqCst,
            );
            if swapped.is_err() {
                // finished right at the deadline
                abandoned.fetch_sub(1, AtomicOrdering::SeqCst);
            } else {
                warn!(
                    designation = %designation,
                    still_running = abandoned.load(AtomicOrdering::SeqCst),
                    "solver call abandoned at the deadline"
                );
            }
            Err(AsterlinkError::SolverTimeout {
                millis: timeout.as_millis() as u64,
            })
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(AsterlinkError::SolverFailure(
            "solver thread ended without an answer".into(),
        )),
    }
}

/// Orbit validation of candidate trajectories.
pub struct OrbitFitAdapter {
    solver: Arc<dyn OrbitSolver>,
    params: OrbitFitParams,
    abandoned: Arc<AtomicUsize>,
}

impl OrbitFitAdapter {
    pub fn new(solver: Arc<dyn OrbitSolver>, params: OrbitFitParams) -> Self {
        OrbitFitAdapter {
            solver,
            params,
            abandoned: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn params(&self) -> &OrbitFitParams {
        &self.params
    }

    /// Solver calls abandoned at the deadline whose thread has not returned yet.
    pub fn abandoned_calls(&self) -> usize {
        self.abandoned.load(AtomicOrdering::SeqCst)
    }

    /// Fit one trajectory.
    ///
    /// Arguments
    /// -----------------
    /// * `trajectory`: the candidate, its detections in time order.
    ///
    /// Return
    /// ----------
    /// * `Ok(FitOutcome)` – confirmed when `elements` is set; a non-confirmed outcome is
    ///   not an error.
    /// * `Err(ResourceExhaustion)` – a solver thread could not be spawned.
    pub fn fit(&self, trajectory: &Trajectory) -> Result<FitOutcome, AsterlinkError> {
        let params = &self.params;
        let mut outcome = FitOutcome::empty(trajectory.id);
        let observations = trajectory.observations();
        if observations.len() < 3 {
            debug!(
                trajectory = %trajectory.id,
                n_points = observations.len(),
                "not enough detections for an orbit fit"
            );
            return Ok(outcome);
        }

        let designation = designation_or_id(observations[0].jd, trajectory.id.0);
        let triplets = select_triplets(
            observations,
            params.optimal_interval_time,
            params.max_obs_for_triplets,
            params.n_triplets as usize,
        );
        let timeout = Duration::from_millis(params.solver_timeout_ms);
        let mut budget = params.orbfit_limit;

        for (rank, indices) in triplets.iter().enumerate() {
            if budget == 0 {
                break;
            }
            let triplet: Triplet = indices.map(|i| observations[i].clone());
            let mut valid: Vec<(u32, OrbitSolution)> = Vec::new();
            let mut executed = 0u32;

            for trial in 0..params.noise_ntrials {
                if budget == 0 {
                    break;
                }
                budget -= 1;
                executed += 1;
                outcome.trials_run += 1;

                let request = SolverRequest {
                    designation: designation.clone(),
                    triplet: triplet.clone(),
                    noise_seed: (trial > 0).then(|| noise_seed(trajectory.id, rank, trial)),
                };
                match call_solver(&self.solver, request, timeout, &self.abandoned) {
                    Ok(solution)
                        if solution.elements.is_physically_valid(
                            params.max_eccentricity,
                            params.max_semi_major_axis_au,
                        ) =>
                    {
                        outcome.converged += 1;
                        valid.push((trial, solution));
                    }
                    Ok(solution) => {
                        debug!(
                            trajectory = %trajectory.id,
                            triplet = rank,
                            trial,
                            a = solution.elements.semi_major_axis,
                            e = solution.elements.eccentricity,
                            "non-physical solution rejected"
                        );
                        outcome.failed += 1;
                    }
                    Err(AsterlinkError::SolverTimeout { millis }) => {
                        warn!(
                            trajectory = %trajectory.id,
                            triplet = rank,
                            trial,
                            millis,
                            "orbit solver timed out"
                        );
                        outcome.timed_out += 1;
                        outcome.failed += 1;
                    }
                    Err(err @ AsterlinkError::ResourceExhaustion(_)) => return Err(err),
                    Err(err) => {
                        debug!(trajectory = %trajectory.id, triplet = rank, trial, %err, "trial failed");
                        outcome.failed += 1;
                    }
                }
            }

            let stable = executed > 0
                && valid.len() as f64 > params.stable_trial_fraction * executed as f64;
            if stable {
                let best = valid.iter().min_by(|a, b| {
                    cmp_rms(a.1.residual_rms, b.1.residual_rms).then(a.0.cmp(&b.0))
                });
                if let Some((_, solution)) = best {
                    outcome.elements = Some(solution.elements.normalized());
                    outcome.residual_rms = solution.residual_rms;
                    outcome.stable_triplet = Some(rank);
                    break;
                }
            }
        }

        debug!(
            trajectory = %trajectory.id,
            trials = outcome.trials_run,
            converged = outcome.converged,
            timed_out = outcome.timed_out,
            confirmed = outcome.success(),
            "orbit fit done"
        );
        Ok(outcome)
    }

    /// Fit a batch of trajectories on the worker pool.
    ///
    /// Outcomes are returned in input order. The first fatal error aborts the batch.
    #[cfg(not(feature = "progress"))]
    pub fn fit_many(
        &self,
        trajectories: &[&Trajectory],
        workers: &ThreadPool,
    ) -> Result<Vec<FitOutcome>, AsterlinkError> {
        workers.install(|| {
            trajectories
                .par_iter()
                .map(|trajectory| self.fit(trajectory))
                .collect()
        })
    }

    /// Fit a batch of trajectories on the worker pool, with a progress bar.
    ///
    /// Outcomes are returned in input order. The first fatal error aborts the batch.
    #[cfg(feature = "progress")]
    pub fn fit_many(
        &self,
        trajectories: &[&Trajectory],
        workers: &ThreadPool,
    ) -> Result<Vec<FitOutcome>, AsterlinkError> {
        use crate::orbit_fit::progress_bar::FitProgress;

        let progress = FitProgress::new(trajectories.len());
        let outcomes = workers.install(|| {
            trajectories
                .par_iter()
                .map(|trajectory| {
                    let outcome = self.fit(trajectory);
                    progress.tick();
                    outcome
                })
                .collect()
        });
        progress.finish();
        outcomes
    }
}
