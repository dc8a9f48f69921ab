//! # Nightly batch ingestion from CSV
//!
//! Reads alert-level detections from a CSV file with the header
//!
//! ```text
//! candid,ra,dec,jd,magpsf,fid,nid
//! ```
//!
//! into a [`NightBatch`]. Rows of other nights are dropped, malformed rows are skipped
//! with a warning. The batch is **not** validated here: the orchestrator validates it
//! before the night starts.
use camino::Utf8Path;
use tracing::{debug, warn};

use crate::{
    asterlink_errors::AsterlinkError,
    constants::NightId,
    observations::{NightBatch, Observation},
};

/// Read the detections of night `nid` from a CSV file.
///
/// Arguments
/// ---------
/// * `path`: CSV file with a `candid,ra,dec,jd,magpsf,fid,nid` header
/// * `nid`: the night to keep
///
/// Return
/// ------
/// * the batch of night `nid`, or an I/O / CSV error if the file cannot be opened or
///   its header cannot be read.
pub fn read_night_csv(path: &Utf8Path, nid: NightId) -> Result<NightBatch, AsterlinkError> {
    let mut reader = csv::Reader::from_path(path)?;
    read_night_from_reader(&mut reader, nid)
}

pub(crate) fn read_night_from_reader<R: std::io::Read>(
    reader: &mut csv::Reader<R>,
    nid: NightId,
) -> Result<NightBatch, AsterlinkError> {
    let mut observations = Vec::new();
    let mut skipped = 0usize;

    for (line, record) in reader.deserialize::<Observation>().enumerate() {
        match record {
            Ok(obs) if obs.nid == nid => observations.push(obs),
            Ok(_) => {}
            Err(err) => {
                skipped += 1;
                warn!(line = line + 2, %err, "skipping malformed detection row");
            }
        }
    }

    debug!(nid, kept = observations.len(), skipped, "night batch read");
    Ok(NightBatch::new(nid, observations))
}
