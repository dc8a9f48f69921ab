//! # Run configuration
//!
//! The [`Config`] value gathers every tunable threshold of a run: association distances,
//! photometric caps, keep-limits, orbit-solver tuning, worker sizing, stage switches and
//! the output base name. It is loaded once from a TOML document whose tables mirror the
//! parameter groups of the pipeline:
//!
//! ```toml
//! [ASSOC_PARAMS]
//! intra_night_separation = 145.0             # arcsec
//! intra_night_magdiff_limit_same_fid = 2.21
//! intra_night_magdiff_limit_diff_fid = 1.75
//! inter_night_separation = 0.3               # degree
//! inter_night_magdiff_limit_same_fid = 0.1
//! inter_night_magdiff_limit_diff_fid = 0.5
//! maximum_angle = 1.0                        # degree
//! use_dbscan = false
//!
//! [TW_PARAMS]
//! trajectory_keep_limit = 15
//! old_observation_keep_limit = 2
//! trajectory_2_points_keep_limit = 8
//!
//! [SOLVE_ORBIT_PARAMS]
//! n_triplets = 10
//! noise_ntrials = 10
//! orbfit_limit = 30
//! orbfit_min_points = 6
//! prop_epoch = 2459000.5
//! solver_timeout_ms = 60000
//!
//! [ASSOC_SYSTEM]
//! tracklets_with_trajectories = true
//! trajectories_with_new_observations = true
//! tracklets_with_old_observations = true
//! new_observations_with_old_observations = true
//!
//! [RESOURCES]
//! cpu_count = 8
//! max_core = 16
//! executor_core = 4
//! executor_memory = "4G"
//! driver_memory = "4G"
//!
//! [OUTPUT]
//! association_output_file = "fink_fat_out"
//! ```
//!
//! No key has a default value: a missing key is reported as
//! [`AsterlinkError::InvalidConfig`]. Once deserialized, [`Config::validate`] checks the
//! ranges and the cross-field constraints (for instance
//! `trajectory_2_points_keep_limit ≤ trajectory_keep_limit`).
//!
//! The configuration is an explicit value handed by reference to every stage; nothing in
//! the crate reads global state.
use std::cmp::Ordering::{Equal, Greater};
use std::fmt;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::asterlink_errors::AsterlinkError;
use crate::constants::{ArcSec, Degree, JD};

/// Association thresholds (`[ASSOC_PARAMS]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssocParams {
    /// Maximum separation between two detections of the same night (arcsec).
    pub intra_night_separation: ArcSec,
    pub intra_night_magdiff_limit_same_fid: f64,
    pub intra_night_magdiff_limit_diff_fid: f64,
    /// Maximum separation between a projected position and a detection (degree).
    pub inter_night_separation: Degree,
    /// Magnitude-rate caps (mag/day, gaps under one day are not divided).
    pub inter_night_magdiff_limit_same_fid: f64,
    pub inter_night_magdiff_limit_diff_fid: f64,
    /// Maximum turn angle between consecutive motion segments (degree).
    pub maximum_angle: Degree,
    pub use_dbscan: bool,
}

/// Keep-limits of the candidate lifecycle (`[TW_PARAMS]`), in nights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwParams {
    pub trajectory_keep_limit: u32,
    pub old_observation_keep_limit: u32,
    pub trajectory_2_points_keep_limit: u32,
}

/// Orbit validation tuning (`[SOLVE_ORBIT_PARAMS]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveOrbitParams {
    /// Number of observation triplets submitted per fit.
    pub n_triplets: u32,
    /// Solver calls per triplet, the first one unperturbed.
    pub noise_ntrials: u32,
    /// Total solver calls allowed for one fit of one trajectory.
    pub orbfit_limit: u32,
    /// Point count from which a trajectory is submitted to the orbit fit.
    pub orbfit_min_points: usize,
    /// Epoch of the reported orbital elements (JD).
    pub prop_epoch: JD,
    pub solver_timeout_ms: u64,
}

/// Inter-night stage switches (`[ASSOC_SYSTEM]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssocSystem {
    pub tracklets_with_trajectories: bool,
    pub trajectories_with_new_observations: bool,
    pub tracklets_with_old_observations: bool,
    pub new_observations_with_old_observations: bool,
}

impl AssocSystem {
    /// Every stage disabled: only intra-night tracklets produce trajectories.
    pub fn all_disabled() -> Self {
        AssocSystem {
            tracklets_with_trajectories: false,
            trajectories_with_new_observations: false,
            tracklets_with_old_observations: false,
            new_observations_with_old_observations: false,
        }
    }

    pub fn all_enabled() -> Self {
        AssocSystem {
            tracklets_with_trajectories: true,
            trajectories_with_new_observations: true,
            tracklets_with_old_observations: true,
            new_observations_with_old_observations: true,
        }
    }
}

/// Worker and memory sizing (`[RESOURCES]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu_count: usize,
    pub max_core: usize,
    /// Accepted and validated but inert: the worker pool is sized by
    /// [`worker_count`](Resources::worker_count) alone.
    pub executor_core: usize,
    /// Memory budget of a stage, e.g. `"4G"`.
    pub executor_memory: String,
    /// Accepted and validated but inert: only `executor_memory` bounds a stage.
    pub driver_memory: String,
}

impl Resources {
    /// Size of the worker pool: `min(cpu_count, max_core)`.
    pub fn worker_count(&self) -> usize {
        self.cpu_count.min(self.max_core).max(1)
    }

    /// `executor_memory` in bytes.
    pub fn executor_memory_bytes(&self) -> Result<u64, AsterlinkError> {
        parse_memory_size(&self.executor_memory)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputParams {
    /// Base name of the association output; the night number is appended.
    pub association_output_file: String,
}

/// Full run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "ASSOC_PARAMS")]
    pub assoc_params: AssocParams,
    #[serde(rename = "TW_PARAMS")]
    pub tw_params: TwParams,
    #[serde(rename = "SOLVE_ORBIT_PARAMS")]
    pub solve_orbit_params: SolveOrbitParams,
    #[serde(rename = "ASSOC_SYSTEM")]
    pub assoc_system: AssocSystem,
    #[serde(rename = "RESOURCES")]
    pub resources: Resources,
    #[serde(rename = "OUTPUT")]
    pub output: OutputParams,
}

/// Parse a memory size such as `"512M"` or `"4G"` into bytes.
///
/// Accepted suffixes are `K`, `M`, `G` and `T` (powers of 1024, case-insensitive); a bare
/// integer is a number of bytes.
pub fn parse_memory_size(raw: &str) -> Result<u64, AsterlinkError> {
    let trimmed = raw.trim();
    let invalid = || AsterlinkError::InvalidConfig(format!("invalid memory size: {raw:?}"));

    let (digits, shift) = match trimmed.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => {
            let shift = match c.to_ascii_uppercase() {
                'K' => 10,
                'M' => 20,
                'G' => 30,
                'T' => 40,
                _ => return Err(invalid()),
            };
            (&trimmed[..trimmed.len() - 1], shift)
        }
        Some(_) => (trimmed, 0),
        None => return Err(invalid()),
    };

    let value: u64 = digits.parse().map_err(|_| invalid())?;
    value.checked_shl(shift).filter(|_| value.leading_zeros() >= shift).ok_or_else(invalid)
}

#[inline]
fn gt0(x: f64) -> bool {
    x.partial_cmp(&0.0) == Some(Greater) && x.is_finite()
}

#[inline]
fn ge0(x: f64) -> bool {
    matches!(x.partial_cmp(&0.0), Some(Greater) | Some(Equal)) && x.is_finite()
}

impl Config {
    /// Deserialize and validate a configuration from a TOML string.
    ///
    /// Return
    /// ------
    /// * `Err(AsterlinkError::InvalidConfig)` when a key is missing, has the wrong type
    ///   or fails [`Config::validate`].
    pub fn from_toml_str(content: &str) -> Result<Self, AsterlinkError> {
        let config: Config =
            toml::from_str(content).map_err(|e| AsterlinkError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, deserialize and validate a configuration file.
    pub fn from_file(path: &Utf8Path) -> Result<Self, AsterlinkError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), AsterlinkError> {
        let err = |msg: &str| Err(AsterlinkError::InvalidConfig(msg.into()));

        let a = &self.assoc_params;
        if !gt0(a.intra_night_separation) || !gt0(a.inter_night_separation) {
            return err("separations must be finite and > 0");
        }
        if !ge0(a.intra_night_magdiff_limit_same_fid)
            || !ge0(a.intra_night_magdiff_limit_diff_fid)
            || !ge0(a.inter_night_magdiff_limit_same_fid)
            || !ge0(a.inter_night_magdiff_limit_diff_fid)
        {
            return err("magnitude difference limits must be finite and >= 0");
        }
        if !gt0(a.maximum_angle) || a.maximum_angle > 180.0 {
            return err("maximum_angle must be in (0, 180]");
        }

        let tw = &self.tw_params;
        if tw.trajectory_2_points_keep_limit > tw.trajectory_keep_limit {
            return err("trajectory_2_points_keep_limit must be <= trajectory_keep_limit");
        }

        let s = &self.solve_orbit_params;
        if s.n_triplets == 0 || s.noise_ntrials == 0 || s.orbfit_limit == 0 {
            return err("n_triplets, noise_ntrials and orbfit_limit must be >= 1");
        }
        if s.orbfit_min_points < 3 {
            return err("orbfit_min_points must be >= 3");
        }
        if !gt0(s.prop_epoch) {
            return err("prop_epoch must be a finite julian date");
        }
        if s.solver_timeout_ms == 0 {
            return err("solver_timeout_ms must be >= 1");
        }

        let r = &self.resources;
        if r.cpu_count == 0 || r.max_core == 0 || r.executor_core == 0 {
            return err("cpu_count, max_core and executor_core must be >= 1");
        }
        parse_memory_size(&r.executor_memory)?;
        parse_memory_size(&r.driver_memory)?;

        if self.output.association_output_file.trim().is_empty() {
            return err("association_output_file must not be empty");
        }
        Ok(())
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.assoc_params;
        let tw = &self.tw_params;
        let s = &self.solve_orbit_params;
        let sys = &self.assoc_system;
        write!(
            f,
            "Config(intra_sep={:.1}\", inter_sep={:.3}°, max_angle={:.2}°, dbscan={}, \
             keep={}/{}/{}, triplets={}x{} (limit {}, min points {}), stages=[{}{}{}{}], workers={})",
            a.intra_night_separation,
            a.inter_night_separation,
            a.maximum_angle,
            a.use_dbscan,
            tw.trajectory_keep_limit,
            tw.trajectory_2_points_keep_limit,
            tw.old_observation_keep_limit,
            s.n_triplets,
            s.noise_ntrials,
            s.orbfit_limit,
            s.orbfit_min_points,
            sys.tracklets_with_trajectories as u8,
            sys.trajectories_with_new_observations as u8,
            sys.tracklets_with_old_observations as u8,
            sys.new_observations_with_old_observations as u8,
            self.resources.worker_count(),
        )
    }
}

#[cfg(test)]
mod config_test {
    use super::*;

    const SAMPLE: &str = r#"
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
n_triplets = 10
noise_ntrials = 10
orbfit_limit = 30
orbfit_min_points = 6
prop_epoch = 2459000.5
solver_timeout_ms = 60000

[ASSOC_SYSTEM]
tracklets_with_trajectories = true
trajectories_with_new_observations = true
tracklets_with_old_observations = true
new_observations_with_old_observations = true

[RESOURCES]
cpu_count = 8
max_core = 16
executor_core = 4
executor_memory = "4G"
driver_memory = "4G"

[OUTPUT]
association_output_file = "fink_fat_out"
"#;

    #[test]
    fn test_load_sample() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.assoc_params.intra_night_separation, 145.0);
        assert_eq!(config.tw_params.trajectory_2_points_keep_limit, 8);
        assert_eq!(config.solve_orbit_params.orbfit_min_points, 6);
        assert_eq!(config.assoc_system, AssocSystem::all_enabled());
        assert_eq!(config.resources.worker_count(), 8);
        assert_eq!(config.resources.executor_memory_bytes().unwrap(), 4 << 30);
        assert_eq!(config.output.association_output_file, "fink_fat_out");
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let content = SAMPLE.replace("maximum_angle = 1.0\n", "");
        let err = Config::from_toml_str(&content).unwrap_err();
        assert!(matches!(err, AsterlinkError::InvalidConfig(_)));
    }

    #[test]
    fn test_keep_limit_order() {
        let content = SAMPLE.replace(
            "trajectory_2_points_keep_limit = 8",
            "trajectory_2_points_keep_limit = 16",
        );
        assert!(matches!(
            Config::from_toml_str(&content),
            Err(AsterlinkError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_invalid_values() {
        for (from, to) in [
            ("orbfit_min_points = 6", "orbfit_min_points = 2"),
            ("n_triplets = 10", "n_triplets = 0"),
            ("maximum_angle = 1.0", "maximum_angle = 181.0"),
            ("inter_night_separation = 0.3", "inter_night_separation = -0.3"),
            ("executor_memory = \"4G\"", "executor_memory = \"four\""),
            (
                "association_output_file = \"fink_fat_out\"",
                "association_output_file = \"\"",
            ),
        ] {
            let content = SAMPLE.replace(from, to);
            assert!(
                Config::from_toml_str(&content).is_err(),
                "{to} should be rejected"
            );
        }
    }

    #[test]
    fn test_executor_core_and_driver_memory_are_inert() {
        let content = SAMPLE
            .replace("executor_core = 4", "executor_core = 1")
            .replace("driver_memory = \"4G\"", "driver_memory = \"1K\"");
        let config = Config::from_toml_str(&content).unwrap();
        assert_eq!(config.resources.worker_count(), 8);
        assert_eq!(config.resources.executor_memory_bytes().unwrap(), 4 << 30);

        // still validated
        let content = SAMPLE.replace("driver_memory = \"4G\"", "driver_memory = \"lots\"");
        assert!(Config::from_toml_str(&content).is_err());
        let content = SAMPLE.replace("executor_core = 4", "executor_core = 0");
        assert!(Config::from_toml_str(&content).is_err());
    }

    #[test]
    fn test_parse_memory_size() {
        assert_eq!(parse_memory_size("512").unwrap(), 512);
        assert_eq!(parse_memory_size("2k").unwrap(), 2048);
        assert_eq!(parse_memory_size("3M").unwrap(), 3 << 20);
        assert_eq!(parse_memory_size("1T").unwrap(), 1 << 40);
        assert!(parse_memory_size("").is_err());
        assert!(parse_memory_size("4X").is_err());
        assert!(parse_memory_size("G").is_err());
    }
}
