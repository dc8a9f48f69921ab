//! Output of the night cycle.
//!
//! After a night committed, the orchestrator hands every trajectory of the store to an
//! [`AssociationSink`] as a [`TrajectoryRecord`]. [`CsvAssociationSink`] writes them to
//! `<association_output_file>_<nid>.csv`, one row per (trajectory, detection):
//!
//! ```text
//! trajectory_id,designation,candid,confirmed,needs_revalidation,ref_epoch,a,e,i,long_node,arg_peri,mean_anomaly
//! 1,K21K00B,1001,true,false,2459000.5,2.7,0.1,5.0,80.0,20.0,300.0
//! 2,K21K00C,1005,false,false,,,,,,,
//! ```
use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::debug;

use crate::{
    asterlink_errors::AsterlinkError,
    constants::{CandId, NightId, TrajectoryId},
    orbit_fit::keplerian_element::KeplerianElements,
    trajectories::{designation::designation_or_id, Trajectory},
};

/// Public view of a trajectory at the end of a night.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrajectoryRecord {
    pub trajectory_id: TrajectoryId,
    pub designation: String,
    /// Detection ids in time order.
    pub candids: Vec<CandId>,
    pub orbit: Option<KeplerianElements>,
    pub confirmed: bool,
    pub needs_revalidation: bool,
}

impl TrajectoryRecord {
    pub fn from_trajectory(trajectory: &Trajectory) -> Self {
        TrajectoryRecord {
            trajectory_id: trajectory.id,
            designation: designation_or_id(trajectory.first().jd, trajectory.id.0),
            candids: trajectory.candids(),
            orbit: trajectory.orbit,
            confirmed: trajectory.confirmed,
            needs_revalidation: trajectory.needs_revalidation,
        }
    }
}

/// Persistence collaborator receiving the committed trajectory set of each night.
pub trait AssociationSink: Send {
    fn emit(&mut self, nid: NightId, records: &[TrajectoryRecord]) -> Result<(), AsterlinkError>;
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    trajectory_id: u64,
    designation: &'a str,
    candid: CandId,
    confirmed: bool,
    needs_revalidation: bool,
    ref_epoch: Option<f64>,
    a: Option<f64>,
    e: Option<f64>,
    i: Option<f64>,
    long_node: Option<f64>,
    arg_peri: Option<f64>,
    mean_anomaly: Option<f64>,
}

/// Writes one CSV file per night next to the configured base name.
#[derive(Debug, Clone)]
pub struct CsvAssociationSink {
    base: Utf8PathBuf,
}

impl CsvAssociationSink {
    pub fn new(base: impl Into<Utf8PathBuf>) -> Self {
        CsvAssociationSink { base: base.into() }
    }

    /// File written for night `nid`.
    pub fn night_path(&self, nid: NightId) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}_{nid}.csv", self.base))
    }
}

impl AssociationSink for CsvAssociationSink {
    fn emit(&mut self, nid: NightId, records: &[TrajectoryRecord]) -> Result<(), AsterlinkError> {
        let path = self.night_path(nid);
        let mut writer = csv::Writer::from_path(&path)?;
        let mut rows = 0usize;

        for record in records {
            let orbit = record.orbit.as_ref();
            for &candid in &record.candids {
                writer.serialize(CsvRow {
                    trajectory_id: record.trajectory_id.0,
                    designation: &record.designation,
                    candid,
                    confirmed: record.confirmed,
                    needs_revalidation: record.needs_revalidation,
                    ref_epoch: orbit.map(|o| o.reference_epoch),
                    a: orbit.map(|o| o.semi_major_axis),
                    e: orbit.map(|o| o.eccentricity),
                    i: orbit.map(|o| o.inclination),
                    long_node: orbit.map(|o| o.ascending_node_longitude),
                    arg_peri: orbit.map(|o| o.periapsis_argument),
                    mean_anomaly: orbit.map(|o| o.mean_anomaly),
                })?;
                rows += 1;
            }
        }
        writer.flush()?;
        debug!(%path, trajectories = records.len(), rows, "associations written");
        Ok(())
    }
}
