pub mod associations;
pub mod asterlink_errors;
pub mod config;
pub mod constants;
mod conversion;
pub mod observations;
pub mod orbit_fit;
pub mod orchestrator;
pub mod time;
pub mod trajectories;
