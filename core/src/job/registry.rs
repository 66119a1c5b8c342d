//! Registry of tracked top-level jobs.

use std::sync::{Mutex, MutexGuard};

use super::{Job, JobStatus};


#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<Vec<Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Job>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, job: Job) {
        self.lock().push(job);
    }

    /// Next free local id.
    pub fn next_id(&self) -> u64 {
        self.lock()
            .iter()
            .map(|j| j.snapshot().id + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.lock().clone()
    }

    pub fn get(&self, id: u64) -> Option<Job> {
        self.lock().iter().find(|j| j.snapshot().id == id).cloned()
    }

    /// Any job or sub-job currently holding `remote_id`.
    pub fn find_remote(&self, remote_id: u64) -> Option<Job> {
        self.lock().iter().find_map(|job| {
            if job.remote_id() == Some(remote_id) {
                return Some(job.clone());
            }
            job.subjobs()
                .into_iter()
                .find(|s| s.remote_id() == Some(remote_id))
        })
    }

    /// Jobs to poll this tick, sub-jobs flattened in place of their master.
    /// Only jobs with a remote id in a monitored state qualify, minus
    /// completing jobs whose finalisation is already queued.
    pub fn monitored_jobs(&self) -> Vec<Job> {
        self.lock()
            .iter()
            .flat_map(|job| {
                if job.has_subjobs() {
                    job.subjobs()
                } else {
                    vec![job.clone()]
                }
            })
            .filter(|job| {
                let rec = job.snapshot();
                rec.remote_id.is_some()
                    && rec.status.is_monitored()
                    && !(rec.status == JobStatus::Completing && job.is_finalising())
            })
            .collect()
    }

    /// Masters with failed sub-jobs still under the resubmission limit.
    pub fn auto_resubmit_candidates(&self, max_attempts: u32) -> Vec<(Job, Vec<Job>)> {
        self.lock()
            .iter()
            .filter_map(|master| {
                let failed: Vec<Job> = master
                    .subjobs()
                    .into_iter()
                    .filter(|s| {
                        let rec = s.snapshot();
                        rec.status == JobStatus::Failed && rec.auto_resubmits < max_attempts
                    })
                    .collect();
                if failed.is_empty() {
                    None
                } else {
                    Some((master.clone(), failed))
                }
            })
            .collect()
    }

    /// True once every tracked job reached a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.lock().iter().all(|j| j.status().is_terminal())
    }
}
