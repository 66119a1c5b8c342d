use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::info;

use crate::backend::Backend;
use crate::command::CliCommand;
use crate::error::{BackendError, Result};
use crate::help::help_text;
use crate::job::Job;
use crate::ops;
use crate::submission::SubmitOutcome;


const WATCH_INTERVAL: Duration = Duration::from_millis(200);


/// Run one command against a bootstrapped backend and return its output.
pub fn execute(backend: &Backend, command: CliCommand) -> Result<String> {
    match command {
        CliCommand::Submit {
            template,
            sandbox,
            name,
            outputs,
            watch,
        } => {
            let text = fs::read_to_string(&template)?;
            let name = name.unwrap_or_else(|| {
                Path::new(&template)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
            let job = backend.create_job(&name, outputs);
            let outcome = backend.submit_job(&job, &text, &sandbox)?;
            let mut out = describe_submission(&job, &outcome);
            if watch {
                watch_until_finished(backend, Some(&job))?;
                out.push_str(&format!("\nJob {} {}", job.fqid(), job.status()));
            }
            Ok(out)
        }
        CliCommand::Resubmit { job } => {
            let job = find_job(backend, &job)?;
            let outcome = backend.resubmit_job(&job)?;
            Ok(describe_submission(&job, &outcome))
        }
        CliCommand::Jobs => Ok(list_jobs(backend)),
        CliCommand::Reset { job, subjobs } => {
            let job = find_job(backend, &job)?;
            if ops::reset(&job, subjobs, backend.workspace())? {
                Ok(format!("Job {} reset to {}", job.fqid(), job.status()))
            } else {
                Err(BackendError::InvalidState(format!(
                    "cannot reset job {} in status {}",
                    job.fqid(),
                    job.status()
                )))
            }
        }
        CliCommand::Monitor => {
            watch_until_finished(backend, None)?;
            Ok(list_jobs(backend))
        }
        CliCommand::Kill { remote_id } => {
            match backend.registry().find_remote(remote_id) {
                Some(job) => {
                    ops::kill(&job, backend.user_pool())?;
                    backend.workspace().commit(&job.master().unwrap_or_else(|| job.clone()))?;
                }
                None => ops::kill_remote(remote_id, backend.user_pool())?,
            }
            Ok(format!("Killed remote job {}", remote_id))
        }
        CliCommand::Peek { remote_id } => ops::peek_remote(remote_id, backend.user_pool()),
        CliCommand::Sandbox { job, dir } => {
            let job = find_job(backend, &job)?;
            let fetched = ops::get_output_sandbox(
                &job,
                dir.as_deref().map(Path::new),
                backend.user_pool(),
                backend.workspace(),
            )?;
            Ok(if fetched {
                format!("Output sandbox of job {} retrieved", job.fqid())
            } else {
                format!("Output sandbox of job {} not available", job.fqid())
            })
        }
        CliCommand::TimeDetails { job } => {
            let job = find_job(backend, &job)?;
            match ops::timedetails(&job, backend.user_pool())? {
                Some(details) => Ok(serde_json::to_string_pretty(&details)?),
                None => Ok(format!("Job {} has not been submitted", job.fqid())),
            }
        }
        CliCommand::Debug { remote_id } => {
            let job = match remote_id {
                Some(id) => Some(backend.registry().find_remote(id).ok_or_else(|| {
                    BackendError::InvalidState(format!("no stored job holds remote id {}", id))
                })?),
                None => None,
            };
            let report = ops::debug(job.as_ref(), backend.user_pool(), backend.workspace())?;
            let mut out = String::new();
            for (service, status) in &report.services {
                out.push_str(&format!("{}: {}\n", service, status));
            }
            match report.pilot_output {
                Some(Ok(path)) => out.push_str(&format!("Pilot Info: {}\n", path.display())),
                Some(Err(message)) => out.push_str(&format!("{}\n", message)),
                None => {}
            }
            Ok(out.trim_end().to_string())
        }
        CliCommand::Exec { command } => {
            let envelope = ops::exec_api(backend.user_pool(), &command, None)?;
            Ok(envelope.to_string())
        }
        CliCommand::Queues => Ok(backend.queue_report()),
        CliCommand::Help { topic } => Ok(help_text(topic.as_deref())),
    }
}


fn describe_submission(job: &Job, outcome: &SubmitOutcome) -> String {
    match outcome {
        SubmitOutcome::Single(id) => format!("Submitted job {} (remote id {})", job.fqid(), id),
        SubmitOutcome::Bulk(n) => format!("Submitted job {} as {} sub-jobs", job.fqid(), n),
    }
}

/// `3` is a stored job, `3.1` its second sub-job.
fn find_job(backend: &Backend, fqid: &str) -> Result<Job> {
    let missing = || BackendError::InvalidState(format!("no job {}", fqid));
    let mut parts = fqid.split('.');
    let top: u64 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(missing)?;
    let job = backend.registry().get(top).ok_or_else(missing)?;
    match parts.next() {
        None => Ok(job),
        Some(index) => {
            let index: usize = index.parse().map_err(|_| missing())?;
            job.subjobs().get(index).cloned().ok_or_else(missing)
        }
    }
}

fn list_jobs(backend: &Backend) -> String {
    let mut out = format!("{:<8} {:<12} {:<12} {}\n", "ID", "STATUS", "REMOTE", "NAME");
    for job in backend.registry().jobs() {
        let rec = job.snapshot();
        let remote = rec.remote_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into());
        out.push_str(&format!("{:<8} {:<12} {:<12} {}\n", rec.fqid, rec.status, remote, rec.name));
        for sub in job.subjobs() {
            let s = sub.snapshot();
            let remote = s.remote_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into());
            out.push_str(&format!("  {:<6} {:<12} {:<12}\n", s.fqid, s.status, remote));
        }
    }
    out.trim_end().to_string()
}

/// Run the monitoring driver until `job` (or every stored job) has
/// finished.
fn watch_until_finished(backend: &Backend, job: Option<&Job>) -> Result<()> {
    let mut driver = backend.start_monitoring()?;
    loop {
        let done = match job {
            Some(j) => j.status().is_terminal(),
            None => backend.registry().all_terminal(),
        };
        if done {
            break;
        }
        thread::sleep(WATCH_INTERVAL);
    }
    driver.stop();
    info!("all watched jobs finished");
    Ok(())
}
