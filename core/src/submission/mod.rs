//! Submission of scripts to the remote service.
//!
//! `submit` renders a template into the job's input workspace and sends it
//! as one `execfile` command. The reply decides the shape of the job: a
//! single integer id is assigned to the job itself, a list of ids expands
//! the job into sub-jobs (see `bulk`). Any other reply is a submission
//! error and leaves the job without a remote id.

pub mod bulk;
pub mod resubmit;

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::envelope::{Expect, Payload};
use crate::error::{BackendError, Result};
use crate::job::{Job, JobWorkspace};
use crate::remote::{commands, RemoteExecutor};
use crate::script;

pub use bulk::setup_bulk_subjobs;
pub use resubmit::{master_auto_resubmit, resubmit, AutoResubmitReport};


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The job got this remote id.
    Single(u64),
    /// The job was expanded into this many sub-jobs.
    Bulk(usize),
}


/// Render `template` with the sandbox file list and submit it.
///
/// When the template carries a user-settings region, the job's settings are
/// written into it first.
pub fn submit(
    job: &Job,
    template: &str,
    sandbox: &[String],
    executor: &dyn RemoteExecutor,
    workspace: &JobWorkspace,
) -> Result<SubmitOutcome> {
    let mut text = script::substitute_sandbox(template, sandbox);
    if text.contains(script::SETTINGS_START) {
        let ident = script::job_ident(&text)?;
        let settings = job.snapshot().settings;
        text = script::apply_user_settings(&text, &ident, &settings)?;
    }

    let fqid = job.fqid();
    workspace.input_dir(&fqid)?;
    let path = workspace.script_path(&fqid);
    fs::write(&path, &text)?;
    common_submit(job, &text, &path, executor, workspace)
}


/// Send an already written script and interpret the reply.
pub fn common_submit(
    job: &Job,
    script_text: &str,
    script_path: &Path,
    executor: &dyn RemoteExecutor,
    workspace: &JobWorkspace,
) -> Result<SubmitOutcome> {
    job.with_record(|r| r.clear_submission());

    let envelope = executor.run(&commands::execfile(script_path))?;
    match envelope.decode(Expect::Submission) {
        Some(Payload::JobId(id)) if envelope.ok => {
            job.with_record(|r| r.remote_id = Some(id));
            workspace.commit(job)?;
            info!(job = %job.fqid(), remote_id = id, "job submitted");
            Ok(SubmitOutcome::Single(id))
        }
        Some(Payload::JobIds(ids)) if envelope.ok && !ids.is_empty() => {
            let count = bulk::setup_bulk_subjobs(job, &ids, script_text, workspace)?;
            info!(job = %job.fqid(), subjobs = count, "bulk job submitted");
            Ok(SubmitOutcome::Bulk(count))
        }
        _ => {
            let reason = if envelope.ok {
                format!("unexpected reply {}", envelope)
            } else {
                envelope.failure_message()
            };
            warn!(job = %job.fqid(), %reason, "submission rejected");
            Err(BackendError::Submission(reason))
        }
    }
}
