//! Finalisation of jobs the remote service reports as completed.
//!
//! Runs as the continuation of the output-sandbox download, on the
//! monitoring worker that fetched it. Gathers CPU time and output-file
//! locations, writes the output manifest, then settles the job as
//! `completed`, or `failed` if the sandbox could not be retrieved.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use glob::Pattern;
use tracing::{debug, error, info, warn};

use super::state_time::record_state_time;
use crate::envelope::{Expect, OutputFileInfo, Payload, ResultEnvelope};
use crate::job::{Job, JobStatus, JobWorkspace};
use crate::remote::{commands, RemoteExecutor};
use crate::script::python_list;


const MISSING_LFN: &str = "Error Getting LFN!";
const MISSING: &str = "NotAvailable";


#[derive(Debug, Clone)]
pub struct Finaliser {
    workspace: JobWorkspace,
    locations_file_name: String,
}

impl Finaliser {
    pub fn new(workspace: JobWorkspace, locations_file_name: &str) -> Self {
        Finaliser {
            workspace,
            locations_file_name: locations_file_name.to_string(),
        }
    }

    pub fn workspace(&self) -> &JobWorkspace {
        &self.workspace
    }

    /// Settle a completing job given the reply of its sandbox download.
    pub fn finalise_completed(
        &self,
        job: &Job,
        sandbox: ResultEnvelope,
        executor: &dyn RemoteExecutor,
    ) {
        let record = job.snapshot();
        let Some(remote_id) = record.remote_id else {
            warn!(job = %record.fqid, "completing job lost its remote id");
            return;
        };

        match executor.run(&commands::norm_cpu_time(remote_id)) {
            Ok(env) => {
                if let Some(Payload::Text(cpu)) = env.decode(Expect::Text) {
                    job.with_record(|r| r.diagnostics.norm_cpu_time = Some(cpu));
                }
            }
            Err(e) => warn!(job = %record.fqid, error = %e, "could not fetch CPU time"),
        }

        let files = match executor.run(&commands::output_data_info(remote_id)) {
            Ok(env) => match env.decode(Expect::OutputInfo) {
                Some(Payload::OutputInfo(files)) => files,
                _ => {
                    warn!(job = %record.fqid, reply = %env, "no output data info");
                    BTreeMap::new()
                }
            },
            Err(e) => {
                warn!(job = %record.fqid, error = %e, "could not fetch output data info");
                BTreeMap::new()
            }
        };

        let wildcards: Vec<String> = record
            .output_files
            .iter()
            .filter(|p| is_wildcard(p))
            .cloned()
            .collect();
        match self.workspace.output_dir(&record.fqid) {
            Ok(dir) => {
                let path = dir.join(&self.locations_file_name);
                match write_manifest(&path, &files, &wildcards) {
                    Ok(true) => debug!(job = %record.fqid, path = %path.display(), "wrote output manifest"),
                    Ok(false) => debug!(job = %record.fqid, "output manifest already present"),
                    Err(e) => error!(job = %record.fqid, error = %e, "could not write output manifest"),
                }
            }
            Err(e) => error!(job = %record.fqid, error = %e, "no output directory"),
        }

        if sandbox.is_ok() {
            record_state_time(job, JobStatus::Completed, executor);
            job.update_status(JobStatus::Completed);
            info!(job = %record.fqid, remote_id, "job completed");
        } else {
            warn!(job = %record.fqid, reason = %sandbox.failure_message(), "problem retrieving output sandbox");
            record_state_time(job, JobStatus::Failed, executor);
            job.update_status(JobStatus::Failed);
        }
        self.commit(job);
    }

    /// Persist the top-level job that owns `job`.
    pub fn commit(&self, job: &Job) {
        let owner = job.master().unwrap_or_else(|| job.clone());
        if let Err(e) = self.workspace.commit(&owner) {
            error!(job = %owner.fqid(), error = %e, "could not persist job");
        }
    }
}


/// Write the manifest unless it already exists. Returns whether it wrote.
///
/// One line per output file and matching wildcard pattern, in file name
/// order. A file matching no wildcard gets an empty pattern.
pub fn write_manifest(
    path: &Path,
    files: &BTreeMap<String, OutputFileInfo>,
    wildcards: &[String],
) -> io::Result<bool> {
    let mut out = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };

    let compiled: Vec<(&str, Pattern)> = wildcards
        .iter()
        .map(|wc| (wc.as_str(), wildcard_pattern(wc)))
        .collect();
    let mut text = String::new();
    for (name, info) in files {
        let mut patterns: Vec<&str> = compiled
            .iter()
            .filter(|(_, pattern)| pattern.matches(name))
            .map(|(wc, _)| *wc)
            .collect();
        if patterns.is_empty() {
            patterns.push("");
        }
        let lfn = info.lfn.as_deref().unwrap_or(MISSING_LFN);
        let locations = info
            .locations
            .as_deref()
            .map(python_list)
            .unwrap_or_else(|| python_list(&[MISSING.to_string()]));
        let guid = info.guid.as_deref().unwrap_or(MISSING);
        for pattern in patterns {
            text.push_str(&format!(
                "DiracFile:::{}&&{}->{}:::{}:::{}\n",
                pattern, name, lfn, locations, guid
            ));
        }
    }
    out.write_all(text.as_bytes())?;
    Ok(true)
}


pub fn is_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', ']'])
}

/// Compile a shell-style output pattern. A pattern glob rejects (such as
/// an unclosed `[`) matches itself literally.
pub fn wildcard_pattern(pattern: &str) -> Pattern {
    Pattern::new(pattern).unwrap_or_else(|_| {
        Pattern::new(&Pattern::escape(pattern)).unwrap_or_default()
    })
}
