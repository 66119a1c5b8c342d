//! Process bootstrap: owns the two worker pools, the job workspace and the
//! registry, and wires them into controllers and the monitoring driver.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::BackendConfig;
use crate::error::Result;
use crate::job::{Job, JobRecord, JobRegistry, JobStatus, JobWorkspace};
use crate::monitor::{AutoResubmit, DriverHandle, Finaliser, MonitorDriver, MonitorLoop};
use crate::pool::{WorkerPool, WorkerState};
use crate::remote::RemoteService;
use crate::submission::{self, SubmitOutcome};


pub struct Backend {
    config: BackendConfig,
    user_pool: Arc<WorkerPool>,
    monitoring_pool: Arc<WorkerPool>,
    workspace: JobWorkspace,
    registry: Arc<JobRegistry>,
}

impl Backend {
    pub fn new(config: BackendConfig, service: Arc<dyn RemoteService>) -> Result<Backend> {
        let user_pool = Arc::new(WorkerPool::new(
            "user",
            config.user_pool_size,
            Arc::clone(&service),
            config.timeout(),
        )?);
        let monitoring_pool = Arc::new(WorkerPool::new(
            "monitor",
            config.monitoring_pool_size,
            service,
            config.timeout(),
        )?);
        let workspace = JobWorkspace::new(&config.workspace_root);
        Ok(Backend {
            config,
            user_pool,
            monitoring_pool,
            workspace,
            registry: Arc::new(JobRegistry::new()),
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn user_pool(&self) -> &WorkerPool {
        &self.user_pool
    }

    pub fn monitoring_pool(&self) -> &WorkerPool {
        &self.monitoring_pool
    }

    pub fn workspace(&self) -> &JobWorkspace {
        &self.workspace
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Register every job committed under the workspace root.
    pub fn load_jobs(&self) -> Result<usize> {
        let mut loaded = 0;
        for id in self.workspace.stored_ids()? {
            if self.registry.get(id).is_some() {
                continue;
            }
            match self.workspace.load(&id.to_string()) {
                Ok(persisted) => {
                    self.registry.add(Job::restore(persisted));
                    loaded += 1;
                }
                Err(e) => warn!(job = id, error = %e, "skipping unreadable job record"),
            }
        }
        Ok(loaded)
    }

    /// A new tracked job carrying the default settings.
    pub fn create_job(&self, name: &str, output_files: Vec<String>) -> Job {
        let mut record = JobRecord::new(
            self.registry.next_id(),
            name,
            self.config.default_settings.clone(),
        );
        record.output_files = output_files;
        let job = Job::new(record);
        self.registry.add(job.clone());
        job
    }

    /// Submit through the user pool. The job ends `submitted` on success
    /// and `failed` otherwise.
    pub fn submit_job(&self, job: &Job, template: &str, sandbox: &[String]) -> Result<SubmitOutcome> {
        job.update_status(JobStatus::Submitting);
        let outcome = submission::submit(job, template, sandbox, self.user_pool.as_ref(), &self.workspace);
        self.settle_submission(job, outcome)
    }

    /// Resubmit through the user pool. On error the job returns to the
    /// status it had before.
    pub fn resubmit_job(&self, job: &Job) -> Result<SubmitOutcome> {
        let previous = job.status();
        job.update_status(JobStatus::Submitting);
        match submission::resubmit(job, self.user_pool.as_ref(), &self.workspace) {
            Ok(outcome) => self.settle_submission(job, Ok(outcome)),
            Err(e) => {
                job.force_status(previous);
                Err(e)
            }
        }
    }

    fn settle_submission(&self, job: &Job, outcome: Result<SubmitOutcome>) -> Result<SubmitOutcome> {
        match &outcome {
            Ok(SubmitOutcome::Single(_)) => {
                job.update_status(JobStatus::Submitted);
            }
            Ok(SubmitOutcome::Bulk(_)) => job.update_master_status(),
            Err(_) => {
                job.update_status(JobStatus::Failed);
            }
        }
        self.workspace.commit(job)?;
        outcome
    }

    pub fn monitor_loop(&self) -> MonitorLoop {
        let finaliser = Finaliser::new(self.workspace.clone(), &self.config.locations_file_name);
        MonitorLoop::new(Arc::clone(&self.monitoring_pool), finaliser, &self.config)
    }

    pub fn monitor_driver(&self) -> MonitorDriver {
        let auto = self.config.auto_resubmit.then(|| AutoResubmit {
            workspace: self.workspace.clone(),
            max_attempts: self.config.max_auto_resubmits,
        });
        MonitorDriver::new(Arc::clone(&self.registry), self.monitor_loop(), auto)
    }

    /// Start polling on a background thread.
    pub fn start_monitoring(&self) -> Result<DriverHandle> {
        let handle = self.monitor_driver().spawn(self.config.poll_interval())?;
        info!(
            user_workers = self.user_pool.size(),
            monitoring_workers = self.monitoring_pool.size(),
            "monitoring started"
        );
        Ok(handle)
    }

    /// Worker and queue listing for both pools.
    pub fn queue_report(&self) -> String {
        render_queues(&self.user_pool, &self.monitoring_pool)
    }
}


/// Side-by-side worker table followed by the pending commands of each pool.
pub fn render_queues(user: &WorkerPool, monitor: &WorkerPool) -> String {
    fn cells(state: &WorkerState) -> (String, String) {
        match state {
            WorkerState::Idle => ("idle".into(), "N/A".into()),
            WorkerState::Busy { command, timeout } => (
                command.chars().take(30).collect(),
                timeout
                    .map(|t| format!("{}s", t.as_secs()))
                    .unwrap_or_else(|| "default".into()),
            ),
        }
    }

    let mut out = String::new();
    out.push_str(&format!("{:^55} | {:^50}\n", "User threads:", "Monitoring threads:"));
    out.push_str(&format!("{:^55} | {:^50}\n", "-------------", "-------------------"));
    out.push_str(&format!(
        "{:<16} {:<30} {:<7} | {:<16} {:<30} {:<7}\n",
        "Name", "Command", "Timeout", "Name", "Command", "Timeout"
    ));

    let users = user.worker_status();
    let monitors = monitor.worker_status();
    for i in 0..users.len().max(monitors.len()) {
        let left = users.get(i).map(|w| (w.name.clone(), cells(&w.state)));
        let right = monitors.get(i).map(|w| (w.name.clone(), cells(&w.state)));
        let (ln, (lc, lt)) = left.unwrap_or_default();
        let (rn, (rc, rt)) = right.unwrap_or_default();
        out.push_str(&format!(
            "{:<16} {:<30} {:<7} | {:<16} {:<30} {:<7}\n",
            ln, lc, lt, rn, rc, rt
        ));
    }

    out.push_str(&format!("\nUser queue:\n{:?}\n", user.queued_commands()));
    out.push_str(&format!("\nMonitoring queue:\n{:?}\n", monitor.queued_commands()));
    out
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ResultEnvelope;
    use crate::remote::mock::MockService;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn make_backend(mock: &MockService, tmp: &TempDir) -> Backend {
        let config = BackendConfig {
            user_pool_size: 1,
            monitoring_pool_size: 1,
            workspace_root: tmp.path().to_string_lossy().into_owned(),
            ..BackendConfig::default()
        };
        Backend::new(config, Arc::new(mock.clone())).unwrap()
    }

    #[test]
    fn submit_job_marks_submitted_and_persists() {
        let tmp = TempDir::new().unwrap();
        let mock = MockService::new();
        mock.reply("execfile(", ResultEnvelope::success(json!(42)));
        let backend = make_backend(&mock, &tmp);

        let job = backend.create_job("first", vec![]);
        assert!(job.snapshot().settings.contains_key("CPUTime"));
        backend.submit_job(&job, "j = Job()\n", &[]).unwrap();
        assert_eq!(job.status(), JobStatus::Submitted);
        assert_eq!(backend.workspace().load("0").unwrap().record.remote_id, Some(42));
    }

    #[test]
    fn failed_submission_marks_failed() {
        let tmp = TempDir::new().unwrap();
        let mock = MockService::new();
        mock.reply("execfile(", ResultEnvelope::failure("rejected"));
        let backend = make_backend(&mock, &tmp);

        let job = backend.create_job("bad", vec![]);
        assert!(backend.submit_job(&job, "j = Job()\n", &[]).is_err());
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[test]
    fn failed_resubmission_restores_status() {
        let tmp = TempDir::new().unwrap();
        let mock = MockService::new();
        let backend = make_backend(&mock, &tmp);
        let job = backend.create_job("orphan", vec![]);
        job.force_status(JobStatus::Failed);

        assert!(backend.resubmit_job(&job).is_err());
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[test]
    fn load_jobs_restores_registry() {
        let tmp = TempDir::new().unwrap();
        let mock = MockService::new();
        mock.reply("execfile(", ResultEnvelope::success(json!(5)));
        {
            let backend = make_backend(&mock, &tmp);
            let job = backend.create_job("kept", vec![]);
            backend.submit_job(&job, "j = Job()\n", &[]).unwrap();
        }
        fs::create_dir_all(tmp.path().join("not-a-job")).unwrap();

        let backend = make_backend(&mock, &tmp);
        assert_eq!(backend.load_jobs().unwrap(), 1);
        assert_eq!(backend.registry().find_remote(5).unwrap().fqid(), "0");
        assert_eq!(backend.create_job("next", vec![]).fqid(), "1");
    }

    #[test]
    fn queue_report_lists_workers() {
        let tmp = TempDir::new().unwrap();
        let backend = make_backend(&MockService::new(), &tmp);
        let report = backend.queue_report();
        assert!(report.contains("user-worker-0"));
        assert!(report.contains("monitor-worker-0"));
        assert!(report.contains("Monitoring queue:\n[]"));
    }
}
