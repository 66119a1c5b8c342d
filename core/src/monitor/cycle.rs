//! One monitoring pass over the active jobs.
//!
//! `MonitorLoop::run_cycle`:
//! 1. Check the monitoring pool's credential; skip the tick if it is gone
//!    (warned once per outage)
//! 2. Snapshot each job's local status
//! 3. Poll all remote ids with one batched `status([...])` command
//! 4. Per job: store diagnostics, detect external status changes, then move
//!    the job along the state machine
//!
//! Completed jobs enter `completing` here; the sandbox download and the
//! final transition happen later on a monitoring worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::finalise::Finaliser;
use super::state_time::record_state_time;
use crate::config::{BackendConfig, StatusConflictPolicy};
use crate::envelope::{Expect, Payload, RemoteStatus};
use crate::job::{Job, JobStatus};
use crate::pool::{Command, WorkerPool};
use crate::remote::{commands, RemoteExecutor};


/// Priority of the sandbox download that finalises a completed job.
pub const COMPLETED_SANDBOX_PRIORITY: u8 = 5;
/// Priority of the best-effort sandbox download of a failed job.
pub const FAILED_SANDBOX_PRIORITY: u8 = 7;


/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleResult {
    /// Jobs whose status was polled.
    pub polled: usize,
    /// Status moves applied, by fqid.
    pub transitions: Vec<(String, JobStatus)>,
    /// Jobs whose local status changed under the loop.
    pub diverged: Vec<String>,
    /// The tick was skipped for lack of a valid credential.
    pub inactive: bool,
    /// The stop flag cut the pass short.
    pub stopped: bool,
}


pub struct MonitorLoop {
    pool: Arc<WorkerPool>,
    finaliser: Finaliser,
    policy: StatusConflictPolicy,
    failed_sandbox_download: bool,
    active: bool,
}

impl MonitorLoop {
    pub fn new(pool: Arc<WorkerPool>, finaliser: Finaliser, config: &BackendConfig) -> Self {
        MonitorLoop {
            pool,
            finaliser,
            policy: config.status_conflict_policy,
            failed_sandbox_download: config.failed_sandbox_download,
            active: true,
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// False while the credential is known to be invalid.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn run_cycle(&mut self, jobs: &[Job], stop: &AtomicBool) -> CycleResult {
        if !self.pool.proxy_valid() {
            if self.active {
                warn!("monitoring inactive: no valid credential");
                self.active = false;
            }
            return CycleResult {
                inactive: true,
                ..CycleResult::default()
            };
        }
        if !self.active {
            info!("monitoring active again");
            self.active = true;
        }

        // Jobs still being submitted may have no id yet.
        let observed: Vec<(Job, JobStatus)> = jobs
            .iter()
            .filter(|j| j.remote_id().is_some())
            .map(|j| (j.clone(), j.status()))
            .collect();
        if observed.is_empty() {
            return CycleResult::default();
        }
        let ids: Vec<u64> = observed.iter().filter_map(|(j, _)| j.remote_id()).collect();

        let envelope = match self.pool.execute(Command::new(commands::status(&ids))) {
            Ok(env) => env,
            Err(e) => {
                warn!(error = %e, "status poll failed");
                return CycleResult::default();
            }
        };
        let statuses = match envelope.decode(Expect::Statuses) {
            Some(Payload::Statuses(rows)) if envelope.ok && rows.len() == observed.len() => rows,
            _ => {
                warn!(reply = %envelope, "monitoring failed: unusable status reply");
                return CycleResult::default();
            }
        };

        self.apply_statuses(&observed, statuses, stop)
    }

    /// Apply one status row per job. `observed` pairs each job with the
    /// local status seen before the poll.
    pub fn apply_statuses(
        &self,
        observed: &[(Job, JobStatus)],
        statuses: Vec<RemoteStatus>,
        stop: &AtomicBool,
    ) -> CycleResult {
        let mut result = CycleResult {
            polled: observed.len(),
            ..CycleResult::default()
        };

        for ((job, before), remote) in observed.iter().zip(statuses) {
            if stop.load(Ordering::SeqCst) {
                result.stopped = true;
                break;
            }
            let current = job.status();
            let master_killed = job.master().map(|m| m.status() == JobStatus::Killed).unwrap_or(false);
            if current == JobStatus::Killed || master_killed {
                continue;
            }

            let fqid = job.with_record(|r| {
                r.diagnostics.status_info = remote.detail.clone();
                r.diagnostics.remote_status = remote.coarse.clone();
                r.diagnostics.location = remote.location.clone();
                r.fqid.clone()
            });

            if current != *before {
                warn!(job = %fqid, from = %before, to = %current, "job status changed outside monitoring");
                result.diverged.push(fqid.clone());
                if self.policy == StatusConflictPolicy::Defer {
                    continue;
                }
            }

            let Some(phase) = JobStatus::parse(&remote.phase) else {
                warn!(job = %fqid, phase = %remote.phase, "unknown remote phase");
                continue;
            };
            if phase == current {
                continue;
            }

            if let Some(moved) = self.advance(job, phase) {
                result.transitions.push((fqid, moved));
            }
        }
        result
    }

    fn advance(&self, job: &Job, phase: JobStatus) -> Option<JobStatus> {
        let executor: &dyn RemoteExecutor = self.pool.as_ref();
        let remote_id = job.remote_id()?;
        match phase {
            JobStatus::Failed => {
                record_state_time(job, JobStatus::Failed, executor);
                if !job.update_status(JobStatus::Failed) {
                    return None;
                }
                if self.failed_sandbox_download {
                    self.queue_failed_sandbox(job, remote_id);
                }
                self.finaliser.commit(job);
                Some(JobStatus::Failed)
            }
            JobStatus::Completed => {
                // A job reported `completing` earlier, or reloaded mid-way,
                // is already in place and only needs its finalisation.
                if job.status() != JobStatus::Completing {
                    record_state_time(job, JobStatus::Completing, executor);
                    if !job.update_status(JobStatus::Completing) {
                        return None;
                    }
                }
                self.queue_finalisation(job, remote_id);
                self.finaliser.commit(job);
                Some(JobStatus::Completing)
            }
            other => {
                record_state_time(job, other, executor);
                if !job.update_status(other) {
                    return None;
                }
                self.finaliser.commit(job);
                Some(other)
            }
        }
    }

    fn queue_failed_sandbox(&self, job: &Job, remote_id: u64) {
        let dir = match self.finaliser.workspace().output_dir(&job.fqid()) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(job = %job.fqid(), error = %e, "no output directory for failed job");
                return;
            }
        };
        let command = Command::new(commands::get_output_sandbox(remote_id, &dir))
            .priority(FAILED_SANDBOX_PRIORITY);
        if let Err(e) = self.pool.execute_nonblocking(command, None) {
            warn!(job = %job.fqid(), error = %e, "could not queue sandbox download");
        }
    }

    /// Queue the sandbox download whose continuation settles the job.
    /// The job stays polled until this succeeds.
    fn queue_finalisation(&self, job: &Job, remote_id: u64) {
        if !job.begin_finalisation() {
            debug!(job = %job.fqid(), "finalisation already in flight");
            return;
        }
        let dir = match self.finaliser.workspace().output_dir(&job.fqid()) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(job = %job.fqid(), error = %e, "no output directory for completing job");
                job.end_finalisation();
                return;
            }
        };
        let command = Command::new(commands::get_output_sandbox(remote_id, &dir))
            .priority(COMPLETED_SANDBOX_PRIORITY);
        let finaliser = self.finaliser.clone();
        let target = job.clone();
        let queued = self.pool.execute_then(command, move |sandbox, worker| {
            let _claim = FinalisationClaim(target.clone());
            finaliser.finalise_completed(&target, sandbox, worker);
        });
        match queued {
            Ok(()) => debug!(job = %job.fqid(), "finalisation queued"),
            Err(e) => {
                warn!(job = %job.fqid(), error = %e, "could not queue finalisation");
                job.end_finalisation();
            }
        }
    }
}


/// Releases a job's finalisation claim when the continuation ends, even by
/// panic.
struct FinalisationClaim(Job);

impl Drop for FinalisationClaim {
    fn drop(&mut self) {
        self.0.end_finalisation();
    }
}
