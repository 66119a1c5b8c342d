//! Shared job handles.
//!
//! A `Job` is a cheap, cloneable handle to one record plus its sub-jobs.
//! The monitoring driver, the submission controllers and pool continuations
//! all hold handles to the same job, so every record sits behind its own
//! mutex. Locks are held for a field update only, never across a remote
//! call. A child never holds its own lock while recomputing its master.

pub mod record;
pub mod registry;
pub mod status;
pub mod workspace;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use record::{Diagnostics, JobRecord, Timestamps};
pub use registry::JobRegistry;
pub use status::JobStatus;
pub use workspace::JobWorkspace;


pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}


struct JobCell {
    record: Mutex<JobRecord>,
    subjobs: Mutex<Vec<Job>>,
    master: Option<Weak<JobCell>>,
    /// A finalisation sequence is queued or running. Not persisted.
    finalising: AtomicBool,
}

#[derive(Clone)]
pub struct Job {
    cell: Arc<JobCell>,
}

/// Serialized form of a job and its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedJob {
    pub record: JobRecord,
    #[serde(default)]
    pub subjobs: Vec<PersistedJob>,
}

impl Job {
    pub fn new(record: JobRecord) -> Job {
        Job {
            cell: Arc::new(JobCell {
                record: Mutex::new(record),
                subjobs: Mutex::new(Vec::new()),
                master: None,
                finalising: AtomicBool::new(false),
            }),
        }
    }

    /// A sub-job of `master`. Not attached until `set_subjobs`.
    pub fn child_of(master: &Job, record: JobRecord) -> Job {
        Job {
            cell: Arc::new(JobCell {
                record: Mutex::new(record),
                subjobs: Mutex::new(Vec::new()),
                master: Some(Arc::downgrade(&master.cell)),
                finalising: AtomicBool::new(false),
            }),
        }
    }

    /// Rebuild a job tree from its persisted form.
    pub fn restore(persisted: PersistedJob) -> Job {
        let job = Job::new(persisted.record);
        let children = persisted
            .subjobs
            .into_iter()
            .map(|p| Job::child_of(&job, p.record))
            .collect();
        *job.subjobs_lock() = children;
        job
    }

    fn lock(&self) -> MutexGuard<'_, JobRecord> {
        self.cell.record.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn subjobs_lock(&self) -> MutexGuard<'_, Vec<Job>> {
        self.cell.subjobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> JobRecord {
        self.lock().clone()
    }

    /// Mutate the record under its lock.
    pub fn with_record<R>(&self, f: impl FnOnce(&mut JobRecord) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    pub fn remote_id(&self) -> Option<u64> {
        self.lock().remote_id
    }

    pub fn fqid(&self) -> String {
        self.lock().fqid.clone()
    }

    /// Move to `next` if the state machine allows it. Records a local
    /// timestamp and recomputes the master. Returns whether it moved.
    pub fn update_status(&self, next: JobStatus) -> bool {
        {
            let mut rec = self.lock();
            if rec.status == next {
                return false;
            }
            if !rec.status.can_transition_to(next) {
                warn!(job = %rec.fqid, from = %rec.status, to = %next, "rejected status change");
                return false;
            }
            debug!(job = %rec.fqid, from = %rec.status, to = %next, "status change");
            rec.status = next;
            rec.timestamps.local.insert(next.as_str().to_string(), now_ms());
        }
        if let Some(master) = self.master() {
            master.update_master_status();
        }
        true
    }

    /// Set the status without consulting the state machine. Used by reset
    /// and to roll back a failed resubmission.
    pub fn force_status(&self, next: JobStatus) {
        {
            let mut rec = self.lock();
            debug!(job = %rec.fqid, from = %rec.status, to = %next, "forced status change");
            rec.status = next;
            rec.timestamps.local.insert(next.as_str().to_string(), now_ms());
        }
        if let Some(master) = self.master() {
            master.update_master_status();
        }
    }

    /// Claim the finalisation of this job. False if one is already in
    /// flight.
    pub fn begin_finalisation(&self) -> bool {
        !self.cell.finalising.swap(true, Ordering::SeqCst)
    }

    pub fn end_finalisation(&self) {
        self.cell.finalising.store(false, Ordering::SeqCst);
    }

    pub fn is_finalising(&self) -> bool {
        self.cell.finalising.load(Ordering::SeqCst)
    }

    pub fn subjobs(&self) -> Vec<Job> {
        self.subjobs_lock().clone()
    }

    pub fn has_subjobs(&self) -> bool {
        !self.subjobs_lock().is_empty()
    }

    /// Replace the sub-job list in one step and recompute this job's status.
    pub fn set_subjobs(&self, subjobs: Vec<Job>) {
        *self.subjobs_lock() = subjobs;
        self.update_master_status();
    }

    pub fn master(&self) -> Option<Job> {
        self.cell
            .master
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|cell| Job { cell })
    }

    /// Recompute the aggregate status from the sub-jobs.
    pub fn update_master_status(&self) {
        let children: Vec<JobStatus> = self.subjobs().iter().map(Job::status).collect();
        let Some(next) = status::aggregate(&children) else {
            return;
        };
        let mut rec = self.lock();
        if rec.status != next {
            debug!(job = %rec.fqid, from = %rec.status, to = %next, "master status change");
            rec.status = next;
            rec.timestamps.local.insert(next.as_str().to_string(), now_ms());
        }
    }

    pub fn same_as(&self, other: &Job) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    pub fn persisted(&self) -> PersistedJob {
        PersistedJob {
            record: self.snapshot(),
            subjobs: self.subjobs().iter().map(Job::persisted).collect(),
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rec = self.lock();
        f.debug_struct("Job")
            .field("fqid", &rec.fqid)
            .field("status", &rec.status)
            .field("remote_id", &rec.remote_id)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn make_job(id: u64) -> Job {
        Job::new(JobRecord::new(id, "test", BTreeMap::new()))
    }

    fn make_master(children: usize) -> Job {
        let master = make_job(1);
        let subjobs = (0..children)
            .map(|i| {
                let rec = master.snapshot().child(i, 100 + i as u64, vec![]);
                Job::child_of(&master, rec)
            })
            .collect();
        master.set_subjobs(subjobs);
        master
    }

    #[test]
    fn update_status_records_timestamp() {
        let job = make_job(1);
        assert!(job.update_status(JobStatus::Submitting));
        let rec = job.snapshot();
        assert_eq!(rec.status, JobStatus::Submitting);
        assert!(rec.timestamps.local.contains_key("submitting"));
    }

    #[test]
    fn illegal_move_is_rejected() {
        let job = make_job(1);
        job.force_status(JobStatus::Completed);
        assert!(!job.update_status(JobStatus::Running));
        assert_eq!(job.status(), JobStatus::Completed);
    }

    #[test]
    fn same_status_is_a_no_op() {
        let job = make_job(1);
        assert!(!job.update_status(JobStatus::New));
    }

    #[test]
    fn master_follows_children() {
        let master = make_master(2);
        assert_eq!(master.status(), JobStatus::Submitted);

        let subjobs = master.subjobs();
        subjobs[0].update_status(JobStatus::Running);
        assert_eq!(master.status(), JobStatus::Running);

        subjobs[0].update_status(JobStatus::Completing);
        subjobs[0].update_status(JobStatus::Completed);
        subjobs[1].update_status(JobStatus::Failed);
        assert_eq!(master.status(), JobStatus::Failed);
    }

    #[test]
    fn child_knows_its_master() {
        let master = make_master(1);
        let child = &master.subjobs()[0];
        assert!(child.master().unwrap().same_as(&master));
        assert!(master.master().is_none());
        assert_eq!(child.fqid(), "1.0");
    }

    #[test]
    fn persisted_round_trip_keeps_tree() {
        let master = make_master(3);
        let json = serde_json::to_string(&master.persisted()).unwrap();
        let restored = Job::restore(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.subjobs().len(), 3);
        assert_eq!(restored.subjobs()[2].remote_id(), Some(102));
        assert!(restored.subjobs()[0].master().unwrap().same_as(&restored));
    }
}
