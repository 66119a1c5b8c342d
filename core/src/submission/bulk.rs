//! Expansion of a bulk submission into sub-jobs.

use tracing::debug;

use crate::error::{BackendError, Result};
use crate::job::{now_ms, Job, JobWorkspace};
use crate::script;


/// Create one sub-job per returned remote id, paired with the dataset
/// partitions found in the submitted script.
///
/// The counts must match. On any error the master keeps its previous
/// sub-job list, so no partial set ever becomes visible.
pub fn setup_bulk_subjobs(
    master: &Job,
    ids: &[u64],
    script_text: &str,
    workspace: &JobWorkspace,
) -> Result<usize> {
    let datasets = script::parametric_datasets(script_text)?;
    if datasets.len() != ids.len() {
        return Err(BackendError::DatasetMismatch(format!(
            "job {} got {} ids for {} parametric datasets",
            master.fqid(),
            ids.len(),
            datasets.len()
        )));
    }

    let template = master.snapshot();
    let subjobs: Vec<Job> = ids
        .iter()
        .zip(datasets)
        .enumerate()
        .map(|(index, (id, dataset))| {
            let mut record = template.child(index, *id, dataset);
            record.timestamps.local.insert("submitted".into(), now_ms());
            Job::child_of(master, record)
        })
        .collect();

    let previous = master.subjobs();
    let count = subjobs.len();
    master.set_subjobs(subjobs);
    if let Err(e) = workspace.commit(master) {
        master.set_subjobs(previous);
        return Err(e);
    }
    debug!(job = %template.fqid, count, "sub-jobs created");
    Ok(count)
}
