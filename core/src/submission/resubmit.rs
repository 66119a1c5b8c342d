//! Resubmission of existing jobs.
//!
//! The script of the previous submission is reused. A sub-job without a
//! script of its own falls back to its master's parametric script, which is
//! narrowed to the sub-job's own dataset. The user-settings region is then
//! regenerated from the job's current settings.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use tracing::{error, info};

use super::{common_submit, SubmitOutcome};
use crate::error::{BackendError, Result};
use crate::job::{Job, JobStatus, JobWorkspace};
use crate::remote::RemoteExecutor;
use crate::script;


/// Resubmit one job through `executor`.
///
/// Errors surface to the caller; the job's local status is not touched.
pub fn resubmit(
    job: &Job,
    executor: &dyn RemoteExecutor,
    workspace: &JobWorkspace,
) -> Result<SubmitOutcome> {
    let (text, path) = rebuild_script(job, workspace)?;
    common_submit(job, &text, &path, executor, workspace)
}


/// Locate the previous script and produce the one to submit now. The new
/// script is written to the job's own input directory.
fn rebuild_script(job: &Job, workspace: &JobWorkspace) -> Result<(String, PathBuf)> {
    let record = job.snapshot();
    let own_path = workspace.script_path(&record.fqid);

    let mut text = if own_path.is_file() {
        fs::read_to_string(&own_path)?
    } else {
        let master = job.master().ok_or_else(|| {
            BackendError::MissingScript(format!("no {} in the input directory of job {}", script::SCRIPT_FILE_NAME, record.fqid))
        })?;
        let master_path = workspace.script_path(&master.fqid());
        if !master_path.is_file() {
            return Err(BackendError::MissingScript(format!(
                "no {} for job {} or its master",
                script::SCRIPT_FILE_NAME,
                record.fqid
            )));
        }
        let parametric = fs::read_to_string(&master_path)?;
        narrow_to_subjob(&parametric, &master, job)?
    };

    let ident = script::job_ident(&text)?;
    text = script::apply_user_settings(&text, &ident, &record.settings)?;

    workspace.input_dir(&record.fqid)?;
    fs::write(&own_path, &text)?;
    Ok((text, own_path))
}


/// Rewrite a master's parametric script for one of its sub-jobs, checking
/// that the script still describes the sub-job's dataset.
fn narrow_to_subjob(parametric: &str, master: &Job, job: &Job) -> Result<String> {
    let record = job.snapshot();
    let datasets = script::parametric_datasets(parametric)?;
    let subjob_count = master.subjobs().len();
    if datasets.len() != subjob_count {
        return Err(BackendError::DatasetMismatch(format!(
            "script of job {} defines {} parametric datasets for {} sub-jobs",
            master.fqid(),
            datasets.len(),
            subjob_count
        )));
    }

    let index = record.id as usize;
    let dataset = datasets.get(index).ok_or_else(|| {
        BackendError::DatasetMismatch(format!("no parametric dataset for sub-job {}", record.fqid))
    })?;
    let expected: BTreeSet<&String> = dataset.iter().collect();
    let actual: BTreeSet<&String> = record.input_data.iter().collect();
    if expected.symmetric_difference(&actual).next().is_some() {
        return Err(BackendError::DatasetMismatch(format!(
            "script dataset of sub-job {} differs from its input data",
            record.fqid
        )));
    }

    script::rewrite_parametric(parametric, dataset, index)
}


// ---------------------------------------------------------------------------
// Batch auto-resubmission
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoResubmitReport {
    /// Sub-jobs resubmitted, by fqid.
    pub resubmitted: Vec<String>,
    /// Sub-jobs that failed again, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Resubmit failed sub-jobs of `master` through the monitoring executor.
///
/// Each job passes through `submitting` and ends `submitted` or `failed`.
/// One job's failure does not stop the batch. The batch is escalated as
/// `IncompleteSubmission` only when nothing could be resubmitted.
pub fn master_auto_resubmit(
    master: &Job,
    jobs: &[Job],
    executor: &dyn RemoteExecutor,
    workspace: &JobWorkspace,
) -> Result<AutoResubmitReport> {
    let mut report = AutoResubmitReport::default();

    for job in jobs {
        let fqid = job.fqid();
        info!(job = %fqid, "auto-resubmitting");
        job.with_record(|r| r.auto_resubmits += 1);
        job.update_status(JobStatus::Submitting);
        match resubmit(job, executor, workspace) {
            Ok(_) => {
                job.update_status(JobStatus::Submitted);
                report.resubmitted.push(fqid);
            }
            Err(e) => {
                error!(job = %fqid, error = %e, "auto-resubmission failed");
                job.update_status(JobStatus::Failed);
                report.failed.push((fqid, e.to_string()));
            }
        }
    }

    master.update_master_status();
    if let Err(e) = workspace.commit(master) {
        error!(job = %master.fqid(), error = %e, "could not persist after auto-resubmission");
    }

    if report.resubmitted.is_empty() {
        if let Some((job, reason)) = report.failed.first() {
            return Err(BackendError::IncompleteSubmission {
                job: job.clone(),
                reason: reason.clone(),
            });
        }
    }
    Ok(report)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ResultEnvelope;
    use crate::job::JobRecord;
    use crate::pool::WorkerContext;
    use crate::remote::mock::MockService;
    use crate::remote::RemoteService;
    use crate::script::SettingValue;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    const PARAMETRIC: &str = "\
# header kept verbatim
j = Job()
j.setName('part_%n')
j.setParametricInputData([['/lfn/a'], ['/lfn/b', '/lfn/c']])
# <-- user settings
j.setCPUTime(100)
# user settings -->
result = dirac.submit(j)
";

    fn executor(mock: &MockService) -> WorkerContext {
        WorkerContext::new("mon-worker-0".into(), mock.open_session("mon-worker-0").unwrap())
    }

    fn make_bulk(ws: &JobWorkspace) -> Job {
        let mut settings = BTreeMap::new();
        settings.insert("CPUTime".to_string(), SettingValue::Int(172800));
        settings.insert("Destination".to_string(), SettingValue::from("LCG.CERN.ch"));
        let master = Job::new(JobRecord::new(2, "part", settings));
        ws.input_dir("2").unwrap();
        fs::write(ws.script_path("2"), PARAMETRIC).unwrap();
        super::super::setup_bulk_subjobs(&master, &[11, 12], PARAMETRIC, ws).unwrap();
        master
    }

    // 1. Sub-job resubmission narrows the parametric script
    #[test]
    fn subjob_uses_master_script() {
        let tmp = TempDir::new().unwrap();
        let ws = JobWorkspace::new(tmp.path());
        let master = make_bulk(&ws);
        let mock = MockService::new();
        mock.reply("execfile(", ResultEnvelope::success(json!(99)));

        let sub = &master.subjobs()[1];
        let outcome = resubmit(sub, &executor(&mock), &ws).unwrap();
        assert_eq!(outcome, SubmitOutcome::Single(99));
        assert_eq!(sub.remote_id(), Some(99));

        let written = fs::read_to_string(ws.script_path("2.1")).unwrap();
        assert_eq!(
            written,
            "\
# header kept verbatim
j = Job()
j.setName('part_1')
j.setInputData(['/lfn/b', '/lfn/c'])
# <-- user settings
j.setCPUTime(172800)
j.setDestination(\"LCG.CERN.ch\")
# user settings -->
result = dirac.submit(j)
"
        );
    }

    // 2. Script dataset no longer matches the sub-job
    #[test]
    fn dataset_mismatch_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let ws = JobWorkspace::new(tmp.path());
        let master = make_bulk(&ws);
        let sub = &master.subjobs()[0];
        sub.with_record(|r| r.input_data = vec!["/lfn/other".into()]);

        let mock = MockService::new();
        let err = resubmit(sub, &executor(&mock), &ws).unwrap_err();
        assert!(matches!(err, BackendError::DatasetMismatch(_)));
        assert!(mock.commands().is_empty());
    }

    // 3. No script anywhere
    #[test]
    fn missing_script_is_reported() {
        let tmp = TempDir::new().unwrap();
        let ws = JobWorkspace::new(tmp.path());
        let job = Job::new(JobRecord::new(8, "lonely", BTreeMap::new()));
        let err = resubmit(&job, &executor(&MockService::new()), &ws).unwrap_err();
        assert!(matches!(err, BackendError::MissingScript(_)));
    }

    // 4. Batch keeps going and only escalates when nothing worked
    #[test]
    fn auto_resubmit_partial_failure_is_not_escalated() {
        let tmp = TempDir::new().unwrap();
        let ws = JobWorkspace::new(tmp.path());
        let master = make_bulk(&ws);
        let subjobs = master.subjobs();
        for sub in &subjobs {
            sub.update_status(JobStatus::Failed);
        }
        subjobs[0].with_record(|r| r.input_data.clear());

        let mock = MockService::new();
        mock.reply("execfile(", ResultEnvelope::success(json!(200)));
        let report = master_auto_resubmit(&master, &subjobs, &executor(&mock), &ws).unwrap();

        assert_eq!(report.resubmitted, vec!["2.1"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(subjobs[0].status(), JobStatus::Failed);
        assert_eq!(subjobs[1].status(), JobStatus::Submitted);
        assert_eq!(subjobs[1].snapshot().auto_resubmits, 1);
        assert_eq!(master.status(), JobStatus::Submitted);
    }

    #[test]
    fn auto_resubmit_total_failure_escalates_first_job() {
        let tmp = TempDir::new().unwrap();
        let ws = JobWorkspace::new(tmp.path());
        let master = make_bulk(&ws);
        let subjobs = master.subjobs();
        for sub in &subjobs {
            sub.update_status(JobStatus::Failed);
        }

        let mock = MockService::new();
        mock.reply("execfile(", ResultEnvelope::failure("no proxy"));
        let err = master_auto_resubmit(&master, &subjobs, &executor(&mock), &ws).unwrap_err();
        match err {
            BackendError::IncompleteSubmission { job, .. } => assert_eq!(job, "2.0"),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(master.status(), JobStatus::Failed);
    }
}
