//! User-triggered job operations.
//!
//! Thin synchronous wrappers over single remote commands, run through the
//! user pool. None of them is part of the monitoring state machine, except
//! that a successful kill moves the job to `killed` and a reset hands the
//! job back to monitoring.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::envelope::{Expect, Payload, ResultEnvelope};
use crate::error::{BackendError, Result};
use crate::job::{Job, JobStatus, JobWorkspace};
use crate::pool::{Command, WorkerPool};
use crate::remote::{commands, RemoteExecutor};


fn remote_failure(remote_id: u64, what: &str, envelope: &ResultEnvelope) -> BackendError {
    BackendError::RemoteCall {
        remote_id: Some(remote_id),
        message: format!("{}: {}", what, envelope.failure_message()),
    }
}

fn require_remote_id(job: &Job) -> Result<u64> {
    job.remote_id().ok_or_else(|| {
        BackendError::InvalidState(format!("job {} has not been submitted", job.fqid()))
    })
}


// ---------------------------------------------------------------------------
// kill / peek
// ---------------------------------------------------------------------------

pub fn kill_remote(remote_id: u64, executor: &dyn RemoteExecutor) -> Result<()> {
    let envelope = executor.run(&commands::kill(remote_id))?;
    if envelope.ok {
        Ok(())
    } else {
        Err(remote_failure(remote_id, "Could not kill job", &envelope))
    }
}

/// Kill a job, or every unfinished sub-job of a master. Returns false when
/// there was nothing to kill.
pub fn kill(job: &Job, executor: &dyn RemoteExecutor) -> Result<bool> {
    if job.has_subjobs() {
        let mut killed = false;
        for sub in job.subjobs() {
            if sub.status().is_terminal() {
                continue;
            }
            killed |= kill(&sub, executor)?;
        }
        return Ok(killed);
    }

    let Some(remote_id) = job.remote_id() else {
        return Ok(false);
    };
    kill_remote(remote_id, executor)?;
    job.update_status(JobStatus::Killed);
    info!(job = %job.fqid(), remote_id, "job killed");
    Ok(true)
}

pub fn peek_remote(remote_id: u64, executor: &dyn RemoteExecutor) -> Result<String> {
    let envelope = executor.run(&commands::peek(remote_id))?;
    match envelope.decode(Expect::Text) {
        Some(Payload::Text(text)) if envelope.ok => Ok(text),
        _ => Err(remote_failure(remote_id, "No peeking available", &envelope)),
    }
}

/// Current standard output of a running job.
pub fn peek(job: &Job, executor: &dyn RemoteExecutor) -> Result<String> {
    peek_remote(require_remote_id(job)?, executor)
}


// ---------------------------------------------------------------------------
// Output sandbox, timing, debug
// ---------------------------------------------------------------------------

/// Download the output sandbox into `dir`, or the job's output directory.
/// A refused download is logged and reported as `false`.
pub fn get_output_sandbox(
    job: &Job,
    dir: Option<&Path>,
    executor: &dyn RemoteExecutor,
    workspace: &JobWorkspace,
) -> Result<bool> {
    let remote_id = require_remote_id(job)?;
    let dir = match dir {
        Some(d) => d.to_path_buf(),
        None => workspace.output_dir(&job.fqid())?,
    };
    let envelope = executor.run(&commands::get_output_sandbox(remote_id, &dir))?;
    if !envelope.is_ok() {
        warn!(job = %job.fqid(), reason = %envelope.failure_message(), "problem retrieving output");
        return Ok(false);
    }
    Ok(true)
}

/// The remote logging history of a job. `None` before submission.
pub fn timedetails(job: &Job, executor: &dyn RemoteExecutor) -> Result<Option<Value>> {
    let Some(remote_id) = job.remote_id() else {
        return Ok(None);
    };
    let envelope = executor.run(&commands::timedetails(remote_id))?;
    if !envelope.is_ok() {
        return Err(remote_failure(remote_id, "Could not get time details", &envelope));
    }
    Ok(envelope.value)
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugReport {
    /// `(system/service, "OK." or the ping failure message)`.
    pub services: Vec<(String, String)>,
    /// Where the pilot output landed, or why it could not be fetched.
    pub pilot_output: Option<std::result::Result<PathBuf, String>>,
}

/// Ping every remote service and, for a submitted job, fetch the output of
/// the pilot that ran it into the job's debug directory.
pub fn debug(
    job: Option<&Job>,
    executor: &dyn RemoteExecutor,
    workspace: &JobWorkspace,
) -> Result<DebugReport> {
    let envelope = executor.run(&commands::service_ports())?;
    let services = match envelope.decode(Expect::Mapping) {
        Some(Payload::Mapping(map)) if envelope.ok => map,
        _ => {
            return Err(BackendError::RemoteCall {
                remote_id: None,
                message: format!("Could not obtain services: {}", envelope.failure_message()),
            })
        }
    };

    let mut report = DebugReport {
        services: Vec::new(),
        pilot_output: None,
    };
    for category in services.keys() {
        let Some((system, service)) = category.split_once('/') else {
            report.services.push((category.clone(), "malformed service name".into()));
            continue;
        };
        let reply = executor.run(&commands::ping(system, service))?;
        let status = if reply.ok {
            "OK.".to_string()
        } else {
            reply.failure_message()
        };
        report.services.push((category.clone(), status));
    }

    let Some(job) = job else {
        return Ok(report);
    };
    let Some(remote_id) = job.remote_id() else {
        return Ok(report);
    };
    let debug_dir = workspace.debug_dir(&job.fqid())?;
    let reply = executor.run(&commands::pilot_output(remote_id, &debug_dir))?;
    report.pilot_output = Some(if reply.ok {
        Ok(debug_dir.join(format!("pilot_{}", remote_id)).join("std.out"))
    } else {
        Err(reply.failure_message())
    });
    Ok(report)
}


// ---------------------------------------------------------------------------
// reset / raw API
// ---------------------------------------------------------------------------

/// Put a job back under monitoring as `submitted`, clearing its output
/// directory. Refused while `submitting` or `killed`. With `do_subjobs`,
/// `completing` and `failed` sub-jobs are reset too.
pub fn reset(job: &Job, do_subjobs: bool, workspace: &JobWorkspace) -> Result<bool> {
    let status = job.status();
    if matches!(status, JobStatus::Submitting | JobStatus::Killed) {
        warn!(job = %job.fqid(), %status, "cannot reset job");
        return Ok(false);
    }

    workspace.clear_output(&job.fqid())?;
    job.force_status(JobStatus::Submitted);

    if job.has_subjobs() {
        if do_subjobs {
            info!(job = %job.fqid(), "resetting completing and failed sub-jobs");
            for sub in job.subjobs() {
                if matches!(sub.status(), JobStatus::Completing | JobStatus::Failed) {
                    reset(&sub, false, workspace)?;
                }
            }
        } else {
            info!(job = %job.fqid(), "sub-jobs left as they are; reset with sub-jobs to include them");
        }
    }

    let owner = job.master().unwrap_or_else(|| job.clone());
    workspace.commit(&owner)?;
    Ok(true)
}

/// Run a raw command on the user pool and return its envelope untouched.
pub fn exec_api(pool: &WorkerPool, command: &str, timeout: Option<Duration>) -> Result<ResultEnvelope> {
    let mut cmd = Command::new(command);
    if let Some(t) = timeout {
        cmd = cmd.timeout(t);
    }
    pool.execute(cmd)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobRecord;
    use crate::pool::WorkerContext;
    use crate::remote::mock::MockService;
    use crate::remote::RemoteService;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn executor(mock: &MockService) -> WorkerContext {
        WorkerContext::new("user-worker-0".into(), mock.open_session("user-worker-0").unwrap())
    }

    fn make_job(id: u64, remote: Option<u64>, status: JobStatus) -> Job {
        let mut rec = JobRecord::new(id, "ops", BTreeMap::new());
        rec.remote_id = remote;
        rec.status = status;
        Job::new(rec)
    }

    fn make_master(statuses: &[JobStatus]) -> Job {
        let master = make_job(1, None, JobStatus::Submitted);
        let subjobs = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let mut rec = master.snapshot().child(i, 60 + i as u64, vec![]);
                rec.status = *s;
                Job::child_of(&master, rec)
            })
            .collect();
        master.set_subjobs(subjobs);
        master
    }

    // 1. kill
    #[test]
    fn kill_moves_job_to_killed() {
        let mock = MockService::new();
        mock.reply("kill(", ResultEnvelope::success(json!(true)));
        let job = make_job(0, Some(5), JobStatus::Running);
        assert!(kill(&job, &executor(&mock)).unwrap());
        assert_eq!(job.status(), JobStatus::Killed);
        assert_eq!(mock.commands(), vec!["kill(5)"]);
    }

    #[test]
    fn kill_without_remote_id_is_a_no_op() {
        let mock = MockService::new();
        let job = make_job(0, None, JobStatus::New);
        assert!(!kill(&job, &executor(&mock)).unwrap());
        assert!(mock.commands().is_empty());
    }

    #[test]
    fn refused_kill_names_the_job() {
        let mock = MockService::new();
        mock.reply("kill(", ResultEnvelope::failure("not owner"));
        let job = make_job(0, Some(5), JobStatus::Running);
        let err = kill(&job, &executor(&mock)).unwrap_err();
        assert!(err.to_string().contains("remote job 5"));
        assert_eq!(job.status(), JobStatus::Running);
    }

    #[test]
    fn kill_master_kills_unfinished_subjobs() {
        let mock = MockService::new();
        mock.reply("kill(", ResultEnvelope::success(json!(true)));
        let master = make_master(&[JobStatus::Running, JobStatus::Completed, JobStatus::Submitted]);
        assert!(kill(&master, &executor(&mock)).unwrap());
        assert_eq!(mock.commands(), vec!["kill(60)", "kill(62)"]);
        assert_eq!(master.status(), JobStatus::Killed);
    }

    // 2. peek
    #[test]
    fn peek_returns_text() {
        let mock = MockService::new();
        mock.reply("peek(", ResultEnvelope::success(json!("line 1\nline 2")));
        let job = make_job(0, Some(8), JobStatus::Running);
        assert_eq!(peek(&job, &executor(&mock)).unwrap(), "line 1\nline 2");
    }

    #[test]
    fn peek_before_submission_is_invalid() {
        let job = make_job(0, None, JobStatus::New);
        let err = peek(&job, &executor(&MockService::new())).unwrap_err();
        assert!(matches!(err, BackendError::InvalidState(_)));
    }

    // 3. output sandbox
    #[test]
    fn refused_sandbox_is_false() {
        let tmp = TempDir::new().unwrap();
        let ws = JobWorkspace::new(tmp.path());
        let mock = MockService::new();
        mock.reply("getOutputSandbox(", ResultEnvelope::failure("gone"));
        let job = make_job(3, Some(9), JobStatus::Completed);
        assert!(!get_output_sandbox(&job, None, &executor(&mock), &ws).unwrap());
        let expected = format!("getOutputSandbox(9,'{}')", ws.output_dir("3").unwrap().display());
        assert_eq!(mock.commands(), vec![expected]);
    }

    // 4. debug
    #[test]
    fn debug_pings_services_and_fetches_pilot() {
        let tmp = TempDir::new().unwrap();
        let ws = JobWorkspace::new(tmp.path());
        let mock = MockService::new();
        mock.reply(
            "getServicePorts(",
            ResultEnvelope::success(json!({"WorkloadManagement/JobManager": 9132, "DataManagement/FileCatalog": 9197})),
        );
        mock.reply("ping('WorkloadManagement'", ResultEnvelope::success(json!(true)));
        mock.reply("ping('DataManagement'", ResultEnvelope::failure("timeout"));
        mock.reply("getJobPilotOutput(", ResultEnvelope::success(json!(true)));
        let job = make_job(2, Some(31), JobStatus::Failed);

        let report = debug(Some(&job), &executor(&mock), &ws).unwrap();
        assert_eq!(
            report.services,
            vec![
                ("DataManagement/FileCatalog".to_string(), "timeout".to_string()),
                ("WorkloadManagement/JobManager".to_string(), "OK.".to_string()),
            ]
        );
        let pilot = report.pilot_output.unwrap().unwrap();
        assert!(pilot.ends_with("debug/pilot_31/std.out"));
    }

    #[test]
    fn debug_without_services_fails() {
        let tmp = TempDir::new().unwrap();
        let ws = JobWorkspace::new(tmp.path());
        let mock = MockService::new();
        mock.reply("getServicePorts(", ResultEnvelope::failure("no config"));
        let err = debug(None, &executor(&mock), &ws).unwrap_err();
        assert!(err.to_string().contains("Could not obtain services"));
    }

    #[test]
    fn timedetails_passes_value_through() {
        let mock = MockService::new();
        mock.reply("timedetails(", ResultEnvelope::success(json!({"Running": "10:00"})));
        let job = make_job(0, Some(4), JobStatus::Running);
        let details = timedetails(&job, &executor(&mock)).unwrap();
        assert_eq!(details, Some(json!({"Running": "10:00"})));
        assert_eq!(timedetails(&make_job(1, None, JobStatus::New), &executor(&mock)).unwrap(), None);
    }

    // 5. reset
    #[test]
    fn reset_clears_output_and_resubmits_monitoring() {
        let tmp = TempDir::new().unwrap();
        let ws = JobWorkspace::new(tmp.path());
        let job = make_job(4, Some(12), JobStatus::Failed);
        let out = ws.output_dir("4").unwrap();
        fs::write(out.join("stdout"), "old").unwrap();

        assert!(reset(&job, false, &ws).unwrap());
        assert_eq!(job.status(), JobStatus::Submitted);
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn reset_refused_while_submitting_or_killed() {
        let tmp = TempDir::new().unwrap();
        let ws = JobWorkspace::new(tmp.path());
        for status in [JobStatus::Submitting, JobStatus::Killed] {
            let job = make_job(5, Some(1), status);
            assert!(!reset(&job, true, &ws).unwrap());
            assert_eq!(job.status(), status);
        }
    }

    #[test]
    fn reset_with_subjobs_resets_completing_and_failed() {
        let tmp = TempDir::new().unwrap();
        let ws = JobWorkspace::new(tmp.path());
        let master = make_master(&[JobStatus::Failed, JobStatus::Completed, JobStatus::Completing]);

        assert!(reset(&master, true, &ws).unwrap());
        let statuses: Vec<JobStatus> = master.subjobs().iter().map(Job::status).collect();
        assert_eq!(
            statuses,
            vec![JobStatus::Submitted, JobStatus::Completed, JobStatus::Submitted]
        );
        assert_eq!(master.status(), JobStatus::Submitted);
    }

    #[test]
    fn exec_api_returns_raw_envelope() {
        let mock = MockService::new();
        mock.reply("getJobs(", ResultEnvelope::success(json!([1, 2])));
        let pool = WorkerPool::new("user", 1, Arc::new(mock), Duration::from_secs(5)).unwrap();
        let env = exec_api(&pool, "getJobs()", Some(Duration::from_secs(2))).unwrap();
        assert_eq!(env.value, Some(json!([1, 2])));
    }
}
