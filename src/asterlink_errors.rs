use thiserror::Error;

use crate::constants::{CandId, TrajectoryId};

#[derive(Error, Debug)]
pub enum AsterlinkError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid observation: {0}")]
    InvalidObservation(String),

    #[error("Duplicate detection id in the same batch: {0}")]
    DuplicateCandId(CandId),

    #[error("Trajectory not found in the store: {0}")]
    UnknownTrajectory(TrajectoryId),

    #[error("Resource exhaustion: {0}")]
    ResourceExhaustion(String),

    #[error("Orbit solver failed: {0}")]
    SolverFailure(String),

    #[error("Orbit solver did not answer within {millis} ms")]
    SolverTimeout { millis: u64 },

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Unable to parse the TOML configuration: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Gaussian noise generation failed: {0:?}")]
    NoiseInjectionError(rand_distr::NormalError),

    #[error("Error while parsing the orbit solver output: {0}")]
    SolverOutputParsing(String),
}

impl From<rand_distr::NormalError> for AsterlinkError {
    fn from(err: rand_distr::NormalError) -> Self {
        AsterlinkError::NoiseInjectionError(err)
    }
}

impl AsterlinkError {
    /// Whether the error aborts the whole night cycle.
    ///
    /// Solver-level failures are absorbed per trial by the orbit fitting layer, everything
    /// else (configuration, resources, corrupted input, I/O) is fatal for the night.
    pub fn is_fatal_for_night(&self) -> bool {
        !matches!(
            self,
            AsterlinkError::SolverFailure(_)
                | AsterlinkError::SolverTimeout { .. }
                | AsterlinkError::SolverOutputParsing(_)
        )
    }
}

impl PartialEq for AsterlinkError {
    fn eq(&self, other: &Self) -> bool {
        use AsterlinkError::*;
        match (self, other) {
            (InvalidConfig(a), InvalidConfig(b)) => a == b,
            (InvalidObservation(a), InvalidObservation(b)) => a == b,
            (DuplicateCandId(a), DuplicateCandId(b)) => a == b,
            (UnknownTrajectory(a), UnknownTrajectory(b)) => a == b,
            (ResourceExhaustion(a), ResourceExhaustion(b)) => a == b,
            (SolverFailure(a), SolverFailure(b)) => a == b,
            (SolverTimeout { millis: a }, SolverTimeout { millis: b }) => a == b,
            (NoiseInjectionError(a), NoiseInjectionError(b)) => a == b,
            (SolverOutputParsing(a), SolverOutputParsing(b)) => a == b,

            // not comparable: equal when same variant
            (IoError(_), IoError(_)) => true,
            (TomlError(_), TomlError(_)) => true,
            (CsvError(_), CsvError(_)) => true,

            _ => false,
        }
    }
}
