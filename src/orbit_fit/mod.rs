//! # Orbit validation
//!
//! This module defines the [`OrbitSolver`] capability, the [`OrbitFitParams`]
//! configuration struct and its builder, and the pieces used by the
//! [`OrbitFitAdapter`](fit_adapter::OrbitFitAdapter) to decide whether a candidate
//! trajectory is consistent with a single Keplerian orbit.
//!
//! ## Pipeline overview
//!
//! 1. **Triplet selection**
//!    Up to `n_triplets` 3-observation subsets are chosen from the trajectory, scored by
//!    their time spacing against `optimal_interval_time`. Long trajectories are first
//!    downsampled to `max_obs_for_triplets` observations.
//!
//! 2. **Noise trials**
//!    Each triplet is submitted up to `noise_ntrials` times to the solver: the first trial
//!    is nominal, the others carry a deterministic noise seed. The total number of solver
//!    calls of one fit is capped by `orbfit_limit`. Each call is bounded by
//!    `solver_timeout_ms`; a late answer is a failed trial.
//!
//! 3. **Validation**
//!    A converged solution counts only when physically valid (`max_eccentricity`,
//!    `max_semi_major_axis_au`). A triplet is stable when strictly more than
//!    `stable_trial_fraction` of its executed trials converged; the first stable triplet
//!    confirms the trajectory with its lowest-RMS solution.
//!
//! ## Example
//!
//! ```rust,no_run
//! use asterlink::orbit_fit::OrbitFitParams;
//!
//! let params = OrbitFitParams::builder()
//!     .n_triplets(5)
//!     .noise_ntrials(10)
//!     .orbfit_limit(30)
//!     .max_eccentricity(0.99)
//!     .build()
//!     .unwrap();
//! ```
//!
//! ## See also
//!
//! * [`fit_adapter::OrbitFitAdapter`] – runs the trials and reports a [`fit_adapter::FitOutcome`].
//! * [`triplets_selection::select_triplets`] – triplet scoring and selection.
//! * [`orbfit_process::OrbfitSolver`] – solver backed by an external OrbFit executable.
//! * [`mpc_80col::format_line`] – astrometry records handed to the solver.
use std::cmp::Ordering::{Equal, Greater, Less};
use std::fmt;

use crate::{
    asterlink_errors::AsterlinkError,
    config::SolveOrbitParams,
    constants::{ArcSec, JD},
    observations::Observation,
};

use keplerian_element::KeplerianElements;

pub mod fit_adapter;
pub mod keplerian_element;
pub mod mpc_80col;
pub mod noise;
pub mod orbfit_process;
#[cfg(feature = "progress")]
pub mod progress_bar;
pub mod triplets_selection;

/// Three observations of one trajectory, in time order.
pub type Triplet = [Observation; 3];

/// One call to the orbit solver.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverRequest {
    /// Object name used by the solver (packed provisional designation).
    pub designation: String,
    pub triplet: Triplet,
    /// `None` for the nominal trial.
    pub noise_seed: Option<u64>,
}

/// A converged orbit returned by the solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitSolution {
    pub elements: KeplerianElements,
    /// Quality of the fit; lower is better, `None` when the solver reports none.
    pub residual_rms: Option<f64>,
}

/// External orbit-determination capability: a triplet and a noise seed in, an orbit or a
/// failure out.
///
/// Implementations run on worker threads and may be abandoned after the timeout, hence
/// the `Send + Sync + 'static` bounds. An abandoned call keeps its thread until `solve`
/// returns, so implementations must bound their own runtime (`OrbfitSolver` kills its
/// process at its own deadline). The adapter counts abandoned calls still running.
pub trait OrbitSolver: Send + Sync + 'static {
    /// Fit an orbit to the request triplet.
    ///
    /// Return
    /// ------
    /// * `Ok(OrbitSolution)` when the solver converged,
    /// * `Err(SolverFailure | SolverOutputParsing | IoError)` otherwise; the adapter turns
    ///   every such error into a failed trial.
    fn solve(&self, request: &SolverRequest) -> Result<OrbitSolution, AsterlinkError>;
}

/// Configuration of the orbit validation.
///
/// Fields
/// -----------------
/// **Solver budget** (from `[SOLVE_ORBIT_PARAMS]`)
/// * `n_triplets` – number of triplets tried per fit.
/// * `noise_ntrials` – solver calls per triplet, the first one nominal.
/// * `orbfit_limit` – total solver calls allowed for one fit.
/// * `prop_epoch` – epoch of the reported elements (JD).
/// * `solver_timeout_ms` – deadline of a single solver call.
///
/// **Triplet selection / noise**
/// * `optimal_interval_time` – target spacing (days) inside a triplet.
/// * `max_obs_for_triplets` – downsampling cap before the triplet enumeration.
/// * `noise_sigma_arcsec` – astrometric noise of the perturbed trials.
///
/// **Validation**
/// * `max_eccentricity` – exclusive bound on `e`.
/// * `max_semi_major_axis_au` – inclusive bound on `a` (AU).
/// * `stable_trial_fraction` – a triplet is stable when strictly more than this fraction
///   of its executed trials converged to a valid orbit.
///
/// Defaults
/// -----------------
/// * `n_triplets`: 10, `noise_ntrials`: 10, `orbfit_limit`: 30
/// * `prop_epoch`: 2459000.5, `solver_timeout_ms`: 60 000
/// * `optimal_interval_time`: 1.0 d, `max_obs_for_triplets`: 100, `noise_sigma_arcsec`: 0.5
/// * `max_eccentricity`: 1.0, `max_semi_major_axis_au`: 100.0, `stable_trial_fraction`: 0.5
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitFitParams {
    // --- Solver budget ---
    pub n_triplets: u32,
    pub noise_ntrials: u32,
    pub orbfit_limit: u32,
    pub prop_epoch: JD,
    pub solver_timeout_ms: u64,

    // --- Triplet selection / noise ---
    pub optimal_interval_time: f64,
    pub max_obs_for_triplets: usize,
    pub noise_sigma_arcsec: ArcSec,

    // --- Validation ---
    pub max_eccentricity: f64,
    pub max_semi_major_axis_au: f64,
    pub stable_trial_fraction: f64,
}

impl OrbitFitParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new [`OrbitFitParamsBuilder`] initialized with the default values.
    pub fn builder() -> OrbitFitParamsBuilder {
        OrbitFitParamsBuilder::new()
    }

    /// Builder initialized from the `[SOLVE_ORBIT_PARAMS]` group of a run configuration;
    /// the other fields keep their defaults.
    pub fn builder_from(solve: &SolveOrbitParams) -> OrbitFitParamsBuilder {
        OrbitFitParamsBuilder::new()
            .n_triplets(solve.n_triplets)
            .noise_ntrials(solve.noise_ntrials)
            .orbfit_limit(solve.orbfit_limit)
            .prop_epoch(solve.prop_epoch)
            .solver_timeout_ms(solve.solver_timeout_ms)
    }
}

impl Default for OrbitFitParams {
    fn default() -> Self {
        OrbitFitParams {
            n_triplets: 10,
            noise_ntrials: 10,
            orbfit_limit: 30,
            prop_epoch: 2459000.5,
            solver_timeout_ms: 60_000,

            optimal_interval_time: 1.0,
            max_obs_for_triplets: 100,
            noise_sigma_arcsec: 0.5,

            max_eccentricity: 1.0,
            max_semi_major_axis_au: 100.0,
            stable_trial_fraction: 0.5,
        }
    }
}

/// Builder for [`OrbitFitParams`], with validation.
#[derive(Debug, Clone)]
pub struct OrbitFitParamsBuilder {
    params: OrbitFitParams,
}

impl Default for OrbitFitParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrbitFitParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: OrbitFitParams::default(),
        }
    }

    // --- Solver budget ---
    pub fn n_triplets(mut self, v: u32) -> Self {
        self.params.n_triplets = v;
        self
    }
    pub fn noise_ntrials(mut self, v: u32) -> Self {
        self.params.noise_ntrials = v;
        self
    }
    pub fn orbfit_limit(mut self, v: u32) -> Self {
        self.params.orbfit_limit = v;
        self
    }
    pub fn prop_epoch(mut self, v: JD) -> Self {
        self.params.prop_epoch = v;
        self
    }
    pub fn solver_timeout_ms(mut self, v: u64) -> Self {
        self.params.solver_timeout_ms = v;
        self
    }

    // --- Triplet selection / noise ---
    pub fn optimal_interval_time(mut self, v: f64) -> Self {
        self.params.optimal_interval_time = v;
        self
    }
    pub fn max_obs_for_triplets(mut self, v: usize) -> Self {
        self.params.max_obs_for_triplets = v;
        self
    }
    pub fn noise_sigma_arcsec(mut self, v: ArcSec) -> Self {
        self.params.noise_sigma_arcsec = v;
        self
    }

    // --- Validation ---
    pub fn max_eccentricity(mut self, v: f64) -> Self {
        self.params.max_eccentricity = v;
        self
    }
    pub fn max_semi_major_axis_au(mut self, v: f64) -> Self {
        self.params.max_semi_major_axis_au = v;
        self
    }
    pub fn stable_trial_fraction(mut self, v: f64) -> Self {
        self.params.stable_trial_fraction = v;
        self
    }

    /// Return true iff x > 0.0 and comparable (i.e., not NaN).
    #[inline]
    fn gt0(x: f64) -> bool {
        x.partial_cmp(&0.0) == Some(Greater)
    }

    /// Return true iff x >= 0.0 and comparable (i.e., not NaN).
    #[inline]
    fn ge0(x: f64) -> bool {
        matches!(x.partial_cmp(&0.0), Some(Greater) | Some(Equal))
    }

    /// Return true iff a < b and comparable (i.e., not NaN).
    #[inline]
    fn lt(a: f64, b: f64) -> bool {
        a.partial_cmp(&b) == Some(Less)
    }

    /// Finalize the builder.
    ///
    /// Validation rules
    /// -----------------
    /// * `n_triplets`, `noise_ntrials`, `orbfit_limit`, `solver_timeout_ms` ≥ 1.
    /// * `prop_epoch > 0`, `optimal_interval_time > 0`.
    /// * `noise_sigma_arcsec ≥ 0`.
    /// * `max_eccentricity > 0`, `max_semi_major_axis_au > 0`.
    /// * `0 ≤ stable_trial_fraction < 1`.
    ///
    /// Special cases
    /// -----------------
    /// **`max_obs_for_triplets < 3`** is accepted and behaves like 3 (first, middle, last).
    ///
    /// Returns
    /// -----------------
    /// * `Ok(OrbitFitParams)` when every rule holds,
    /// * `Err(AsterlinkError::InvalidConfig)` otherwise.
    pub fn build(self) -> Result<OrbitFitParams, AsterlinkError> {
        let p = &self.params;
        let err = |msg: &str| Err(AsterlinkError::InvalidConfig(msg.into()));

        if p.n_triplets == 0 || p.noise_ntrials == 0 || p.orbfit_limit == 0 {
            return err("n_triplets, noise_ntrials and orbfit_limit must be >= 1");
        }
        if p.solver_timeout_ms == 0 {
            return err("solver_timeout_ms must be >= 1");
        }
        if !Self::gt0(p.prop_epoch) || !p.prop_epoch.is_finite() {
            return err("prop_epoch must be a finite julian date");
        }
        if !Self::gt0(p.optimal_interval_time) {
            return err("optimal_interval_time must be > 0");
        }
        if !Self::ge0(p.noise_sigma_arcsec) {
            return err("noise_sigma_arcsec must be >= 0");
        }
        if !Self::gt0(p.max_eccentricity) || !Self::gt0(p.max_semi_major_axis_au) {
            return err("max_eccentricity and max_semi_major_axis_au must be > 0");
        }
        if !Self::ge0(p.stable_trial_fraction) || !Self::lt(p.stable_trial_fraction, 1.0) {
            return err("stable_trial_fraction must be in [0, 1)");
        }

        Ok(self.params)
    }
}

impl fmt::Display for OrbitFitParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            const PARAM_COL: usize = 50; // width reserved for "name = value"
            writeln!(f, "Orbit Validation Parameters")?;
            writeln!(f, "---------------------------")?;

            macro_rules! line {
                ($fmt:expr, $val:expr, $comment:expr) => {{
                    let s = format!($fmt, $val);
                    let pad = if s.len() < PARAM_COL {
                        " ".repeat(PARAM_COL - s.len())
                    } else {
                        " ".to_string()
                    };
                    writeln!(f, "  {}{}# {}", s, pad, $comment)
                }};
            }

            writeln!(f, "[Solver budget]")?;
            line!("n_triplets             = {}", self.n_triplets, "Triplets tried per fit")?;
            line!(
                "noise_ntrials          = {}",
                self.noise_ntrials,
                "Solver calls per triplet"
            )?;
            line!(
                "orbfit_limit           = {}",
                self.orbfit_limit,
                "Total solver calls per fit"
            )?;
            line!(
                "prop_epoch             = {:.5}",
                self.prop_epoch,
                "Epoch of the elements (JD)"
            )?;
            line!(
                "solver_timeout_ms      = {}",
                self.solver_timeout_ms,
                "Deadline of one solver call"
            )?;

            writeln!(f, "\n[Triplet selection / noise]")?;
            line!(
                "optimal_interval_time  = {:.3} d",
                self.optimal_interval_time,
                "Target spacing inside triplet"
            )?;
            line!(
                "max_obs_for_triplets   = {}",
                self.max_obs_for_triplets,
                "Cap on obs used to build triplets"
            )?;
            line!(
                "noise_sigma_arcsec     = {:.3}\"",
                self.noise_sigma_arcsec,
                "Astrometric noise of perturbed trials"
            )?;

            writeln!(f, "\n[Validation]")?;
            line!(
                "max_eccentricity       = {:.3}",
                self.max_eccentricity,
                "Exclusive eccentricity bound"
            )?;
            line!(
                "max_semi_major_axis_au = {:.1} AU",
                self.max_semi_major_axis_au,
                "Inclusive semi-major axis bound"
            )?;
            line!(
                "stable_trial_fraction  = {:.2}",
                self.stable_trial_fraction,
                "Converged share needed for stability"
            )?;

            Ok(())
        } else {
            write!(
                f,
                "OrbitFitParams(n_triplets={}, noise_ntrials={}, orbfit_limit={}, timeout={}ms, dtw={:.2}d, e<{:.2}, a≤{:.1}AU, stable>{:.2})",
                self.n_triplets,
                self.noise_ntrials,
                self.orbfit_limit,
                self.solver_timeout_ms,
                self.optimal_interval_time,
                self.max_eccentricity,
                self.max_semi_major_axis_au,
                self.stable_trial_fraction,
            )
        }
    }
}

#[cfg(test)]
mod orbit_fit_params_test {
    use super::*;

    #[test]
    fn test_builder_defaults_and_overrides() {
        let params = OrbitFitParams::builder()
            .n_triplets(1)
            .noise_ntrials(3)
            .max_eccentricity(0.9)
            .build()
            .unwrap();
        assert_eq!(params.n_triplets, 1);
        assert_eq!(params.noise_ntrials, 3);
        assert_eq!(params.orbfit_limit, 30);
        assert_eq!(params.max_eccentricity, 0.9);
        assert_eq!(OrbitFitParams::new(), OrbitFitParams::default());
    }

    #[test]
    fn test_builder_rejects() {
        assert!(OrbitFitParams::builder().n_triplets(0).build().is_err());
        assert!(OrbitFitParams::builder().solver_timeout_ms(0).build().is_err());
        assert!(OrbitFitParams::builder().prop_epoch(f64::NAN).build().is_err());
        assert!(OrbitFitParams::builder().noise_sigma_arcsec(-1.0).build().is_err());
        assert!(OrbitFitParams::builder().stable_trial_fraction(1.0).build().is_err());
        assert!(OrbitFitParams::builder()
            .max_semi_major_axis_au(0.0)
            .build()
            .is_err());
    }

    #[test]
    fn test_builder_from_config() {
        let solve = SolveOrbitParams {
            n_triplets: 4,
            noise_ntrials: 2,
            orbfit_limit: 8,
            orbfit_min_points: 5,
            prop_epoch: 2459100.5,
            solver_timeout_ms: 250,
        };
        let params = OrbitFitParams::builder_from(&solve).build().unwrap();
        assert_eq!(params.n_triplets, 4);
        assert_eq!(params.noise_ntrials, 2);
        assert_eq!(params.orbfit_limit, 8);
        assert_eq!(params.prop_epoch, 2459100.5);
        assert_eq!(params.solver_timeout_ms, 250);
    }

    #[test]
    fn test_display() {
        let params = OrbitFitParams::default();
        let table = format!("{params:#}");
        assert!(table.contains("[Solver budget]"));
        assert!(table.contains("stable_trial_fraction"));
        assert!(format!("{params}").starts_with("OrbitFitParams("));
    }
}
