//! # OrbFit process solver
//!
//! [`OrbfitSolver`] implements [`OrbitSolver`] on top of an installed OrbFit executable.
//! Each call works in its own sub-directory of the configured working directory:
//!
//! ```text
//! <work_dir>/call_<n>/
//!     mpcobs/<desig>.obs   80-column astrometry of the (perturbed) triplet
//!     <desig>.inp          path prefix of the run, fed to the executable on stdin
//!     <desig>.oop          option file (Keplerian output at prop_epoch, fcct14 errors)
//!     <desig>.oel          elements written by OrbFit on convergence
//! ```
//!
//! The JPL ephemeris files (`AST17.bai`, `AST17.bep`) are looked up once from the
//! `ephemeris` prefix, by default `<work_dir>/AST17`.
//!
//! A missing `.oel` after the process exited means OrbFit did not converge. The process is
//! killed when it runs past its own deadline, independently of the adapter timeout.
use std::fmt::Write as _;
use std::fs::{self, File};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::{
    asterlink_errors::AsterlinkError,
    constants::{ArcSec, DEFAULT_OBS_CODE, JD},
    orbit_fit::{
        keplerian_element::KeplerianElements, mpc_80col::format_observations,
        noise::perturb_triplet, OrbitFitParams, OrbitSolution, OrbitSolver, SolverRequest,
    },
    time::mjd_to_jd,
};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Orbit solver running the OrbFit executable.
#[derive(Debug)]
pub struct OrbfitSolver {
    binary: Utf8PathBuf,
    work_dir: Utf8PathBuf,
    ephemeris: Utf8PathBuf,
    prop_epoch: JD,
    noise_sigma: ArcSec,
    obs_code: String,
    kill_timeout: Duration,
    calls: AtomicU64,
}

impl OrbfitSolver {
    /// Solver writing under `work_dir`, with the epoch, noise and deadline of `params`.
    pub fn new(
        binary: impl Into<Utf8PathBuf>,
        work_dir: impl Into<Utf8PathBuf>,
        params: &OrbitFitParams,
    ) -> Self {
        let work_dir = work_dir.into();
        OrbfitSolver {
            binary: binary.into(),
            ephemeris: work_dir.join("AST17"),
            work_dir,
            prop_epoch: params.prop_epoch,
            noise_sigma: params.noise_sigma_arcsec,
            obs_code: DEFAULT_OBS_CODE.to_string(),
            kill_timeout: Duration::from_millis(params.solver_timeout_ms),
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_obs_code(mut self, obs_code: impl Into<String>) -> Self {
        self.obs_code = obs_code.into();
        self
    }

    /// Prefix of the `.bai` / `.bep` ephemeris files.
    pub fn with_ephemeris(mut self, prefix: impl Into<Utf8PathBuf>) -> Self {
        self.ephemeris = prefix.into();
        self
    }

    pub fn with_kill_timeout(mut self, kill_timeout: Duration) -> Self {
        self.kill_timeout = kill_timeout;
        self
    }

    /// Content of the `.oop` option file.
    ///
    /// A call solves one triplet once: triplet selection and noise trials are driven by
    /// the adapter, so OrbFit runs a single triplet and a single trial.
    pub(crate) fn oop_options(&self, dir: &str, designation: &str) -> String {
        let mut oop = String::new();
        // writing to a String cannot fail
        let _ = write!(
            oop,
            "output.\n\
             \t.elements = 'KEP'\n\
             \t.epoch = JD {:.8} UTC\n\
             init_orbdet.\n\
             \t.verbose = 1\n\
             \t.n_triplets = 1\n\
             \t.noise.ntrials = 1\n\
             operations.\n\
             \t.init_orbdet = 2\n\
             \t.diffcor = 2\n\
             \t.ident = 0\n\
             \t.ephem = 0\n\
             error_model.\n\
             \t.name='fcct14'\n\
             IERS.\n\
             \t.extrapolation = .T.\n\
             reject.\n\
             \t.rejopp = .FALSE.\n\
             propag.\n\
             \t.iast = 17\n\
             \t.npoint = 600\n\
             \t.dmea = 0.2d0\n\
             \t.dter = 0.05d0\n\
             \t.filbe = {}\n\
             output_files.\n\
             \t.elem = {dir}{designation}.oel\n\
             object1.\n\
             \t.obs_dir = {dir}mpcobs\n\
             \t.name = {designation}\n",
            self.prop_epoch, self.ephemeris,
        );
        oop
    }

    fn write_inputs(
        &self,
        call_dir: &Utf8Path,
        request: &SolverRequest,
    ) -> Result<Utf8PathBuf, AsterlinkError> {
        let designation = &request.designation;
        let triplet = perturb_triplet(&request.triplet, request.noise_seed, self.noise_sigma)?;

        let obs_dir = call_dir.join("mpcobs");
        fs::create_dir_all(&obs_dir)?;
        fs::write(
            obs_dir.join(format!("{designation}.obs")),
            format_observations(designation, &triplet, &self.obs_code) + "\n",
        )?;

        let prefix = format!("{call_dir}/");
        let inp = call_dir.join(format!("{designation}.inp"));
        fs::write(&inp, format!("{prefix}{designation}"))?;
        fs::write(
            call_dir.join(format!("{designation}.oop")),
            self.oop_options(&prefix, designation),
        )?;
        Ok(inp)
    }

    /// Run the executable, killing it at the deadline.
    fn run(&self, call_dir: &Utf8Path, inp: &Utf8Path) -> Result<(), AsterlinkError> {
        let mut child = Command::new(self.binary.as_std_path())
            .current_dir(call_dir)
            .stdin(File::open(inp)?)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let deadline = Instant::now() + self.kill_timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                if !status.success() {
                    debug!(%status, "orbfit exited with an error status");
                }
                return Ok(());
            }
            if Instant::now() >= deadline {
                // already exited between the two checks otherwise
                let _ = child.kill();
                let _ = child.wait();
                return Err(AsterlinkError::SolverTimeout {
                    millis: self.kill_timeout.as_millis() as u64,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn solve_in(
        &self,
        call_dir: &Utf8Path,
        request: &SolverRequest,
    ) -> Result<OrbitSolution, AsterlinkError> {
        let inp = self.write_inputs(call_dir, request)?;
        self.run(call_dir, &inp)?;

        let oel = call_dir.join(format!("{}.oel", request.designation));
        match fs::read_to_string(&oel) {
            Ok(content) => parse_oel(&content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(
                AsterlinkError::SolverFailure(format!("no convergence for {}", request.designation)),
            ),
            Err(err) => Err(err.into()),
        }
    }
}

impl OrbitSolver for OrbfitSolver {
    fn solve(&self, request: &SolverRequest) -> Result<OrbitSolution, AsterlinkError> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        let call_dir = self.work_dir.join(format!("call_{n}"));
        let result = self.solve_in(&call_dir, request);
        if let Err(err) = fs::remove_dir_all(&call_dir) {
            debug!(dir = %call_dir, %err, "cannot remove the orbfit call directory");
        }
        result
    }
}

/// Parse a Fortran real (`1.5D+00` exponents accepted).
fn parse_real(token: &str) -> Result<f64, AsterlinkError> {
    token
        .replace(['D', 'd'], "E")
        .parse::<f64>()
        .map_err(|_| AsterlinkError::SolverOutputParsing(format!("not a number: {token:?}")))
}

/// Read the orbit of an OrbFit `.oel` file.
///
/// * `KEP` line: a, e, i, Ω, ω, M.
/// * `MJD` line: epoch of the elements (TDT), converted to JD.
/// * `RMS` line (optional): uncertainties of the six elements; their mean is the
///   residual RMS of the solution.
pub(crate) fn parse_oel(content: &str) -> Result<OrbitSolution, AsterlinkError> {
    let mut kep: Option<Vec<f64>> = None;
    let mut mjd: Option<f64> = None;
    let mut rms: Option<f64> = None;

    for line in content.lines() {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("KEP") => {
                kep = Some(tokens.take(6).map(parse_real).collect::<Result<_, _>>()?);
            }
            Some("MJD") => {
                let value = tokens.next().ok_or_else(|| {
                    AsterlinkError::SolverOutputParsing("MJD line without a value".into())
                })?;
                mjd = Some(parse_real(value)?);
            }
            Some("RMS") => {
                let values: Vec<f64> = tokens.filter_map(|t| parse_real(t).ok()).collect();
                if values.len() >= 6 {
                    let last = &values[values.len() - 6..];
                    rms = Some(last.iter().sum::<f64>() / 6.0);
                }
            }
            _ => {}
        }
    }

    let kep = kep.ok_or_else(|| AsterlinkError::SolverOutputParsing("no KEP line".into()))?;
    if kep.len() != 6 {
        return Err(AsterlinkError::SolverOutputParsing(format!(
            "KEP line with {} elements",
            kep.len()
        )));
    }
    let mjd = mjd.ok_or_else(|| AsterlinkError::SolverOutputParsing("no MJD line".into()))?;

    Ok(OrbitSolution {
        elements: KeplerianElements {
            reference_epoch: mjd_to_jd(mjd),
            semi_major_axis: kep[0],
            eccentricity: kep[1],
            inclination: kep[2],
            ascending_node_longitude: kep[3],
            periapsis_argument: kep[4],
            mean_anomaly: kep[5],
        },
        residual_rms: rms,
    })
}
