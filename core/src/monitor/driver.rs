//! Periodic monitoring driver.
//!
//! Runs a `MonitorLoop` on its own thread once per poll interval over the
//! registry's active jobs. The driver only enqueues work onto the
//! monitoring pool; it never talks to the remote service directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info};

use super::cycle::{CycleResult, MonitorLoop};
use crate::error::Result;
use crate::job::{JobRegistry, JobWorkspace};
use crate::submission::master_auto_resubmit;


/// Automatic resubmission of failed sub-jobs after each tick.
#[derive(Debug, Clone)]
pub struct AutoResubmit {
    pub workspace: JobWorkspace,
    pub max_attempts: u32,
}


pub struct MonitorDriver {
    registry: Arc<JobRegistry>,
    monitor: MonitorLoop,
    auto_resubmit: Option<AutoResubmit>,
    stop: Arc<AtomicBool>,
}

impl MonitorDriver {
    pub fn new(
        registry: Arc<JobRegistry>,
        monitor: MonitorLoop,
        auto_resubmit: Option<AutoResubmit>,
    ) -> Self {
        MonitorDriver {
            registry,
            monitor,
            auto_resubmit,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// One scheduling tick.
    pub fn tick(&mut self) -> CycleResult {
        let jobs = self.registry.monitored_jobs();
        let result = if jobs.is_empty() {
            CycleResult::default()
        } else {
            self.monitor.run_cycle(&jobs, &self.stop)
        };
        debug!(polled = result.polled, moved = result.transitions.len(), "monitoring tick");

        if let Some(auto) = &self.auto_resubmit {
            if !result.inactive && !self.stop.load(Ordering::SeqCst) {
                self.resubmit_failed(auto);
            }
        }
        result
    }

    fn resubmit_failed(&self, auto: &AutoResubmit) {
        let executor = self.monitor.pool().as_ref();
        for (master, failed) in self.registry.auto_resubmit_candidates(auto.max_attempts) {
            match master_auto_resubmit(&master, &failed, executor, &auto.workspace) {
                Ok(report) => info!(
                    job = %master.fqid(),
                    resubmitted = report.resubmitted.len(),
                    failed = report.failed.len(),
                    "auto-resubmission done"
                ),
                Err(e) => error!(job = %master.fqid(), error = %e, "auto-resubmission incomplete"),
            }
        }
    }

    /// Run `tick` every `interval` on a background thread.
    pub fn spawn(mut self, interval: Duration) -> Result<DriverHandle> {
        let stop = Arc::clone(&self.stop);
        let (sender, receiver) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("monitor-driver".into())
            .spawn(move || loop {
                if self.stop.load(Ordering::SeqCst) {
                    break;
                }
                self.tick();
                match receiver.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        info!(interval_secs = interval.as_secs(), "monitoring driver started");
        Ok(DriverHandle {
            stop,
            sender: Some(sender),
            handle: Some(handle),
        })
    }
}


/// Controls a running driver. Dropping it stops the driver.
pub struct DriverHandle {
    stop: Arc<AtomicBool>,
    sender: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DriverHandle {
    /// Raise the stop flag and wait for the current tick to wind down.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("monitoring driver panicked");
            }
            info!("monitoring driver stopped");
        }
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        self.stop();
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::envelope::ResultEnvelope;
    use crate::job::{Job, JobRecord, JobStatus};
    use crate::monitor::finalise::Finaliser;
    use crate::pool::WorkerPool;
    use crate::remote::mock::MockService;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::fs;
    use std::time::Instant;
    use tempfile::TempDir;

    fn make_driver(
        mock: &MockService,
        registry: &Arc<JobRegistry>,
        workspace: &JobWorkspace,
        auto: Option<AutoResubmit>,
    ) -> MonitorDriver {
        let pool = Arc::new(
            WorkerPool::new("monitor", 1, Arc::new(mock.clone()), Duration::from_secs(5)).unwrap(),
        );
        let config = BackendConfig::default();
        let finaliser = Finaliser::new(workspace.clone(), &config.locations_file_name);
        MonitorDriver::new(Arc::clone(registry), MonitorLoop::new(pool, finaliser, &config), auto)
    }

    fn tracked_job(id: u64, remote: u64) -> Job {
        let mut rec = JobRecord::new(id, "drv", BTreeMap::new());
        rec.remote_id = Some(remote);
        rec.status = JobStatus::Submitted;
        Job::new(rec)
    }

    #[test]
    fn tick_polls_registry_jobs() {
        let tmp = TempDir::new().unwrap();
        let ws = JobWorkspace::new(tmp.path());
        let mock = MockService::new();
        mock.reply("status(", ResultEnvelope::success(json!([["", "Running", "site", "running"]])));
        mock.reply("getStateTime(", ResultEnvelope::success(json!("t")));
        let registry = Arc::new(JobRegistry::new());
        let job = tracked_job(0, 21);
        registry.add(job.clone());

        let mut driver = make_driver(&mock, &registry, &ws, None);
        let result = driver.tick();
        assert_eq!(result.polled, 1);
        assert_eq!(job.status(), JobStatus::Running);
    }

    #[test]
    fn empty_registry_sends_nothing() {
        let tmp = TempDir::new().unwrap();
        let ws = JobWorkspace::new(tmp.path());
        let mock = MockService::new();
        let registry = Arc::new(JobRegistry::new());
        let mut driver = make_driver(&mock, &registry, &ws, None);
        assert_eq!(driver.tick(), CycleResult::default());
        assert!(mock.commands().is_empty());
    }

    #[test]
    fn spawned_driver_ticks_until_stopped() {
        let tmp = TempDir::new().unwrap();
        let ws = JobWorkspace::new(tmp.path());
        let mock = MockService::new();
        mock.reply("status(", ResultEnvelope::success(json!([["", "Waiting", "", "submitted"]])));
        let registry = Arc::new(JobRegistry::new());
        registry.add(tracked_job(0, 30));

        let driver = make_driver(&mock, &registry, &ws, None);
        let mut handle = driver.spawn(Duration::from_millis(10)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while mock.commands_matching("status(").len() < 2 {
            assert!(Instant::now() < deadline, "driver did not tick twice");
            thread::sleep(Duration::from_millis(5));
        }
        handle.stop();
        let sent = mock.commands().len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(mock.commands().len(), sent);
    }

    #[test]
    fn failed_subjobs_are_auto_resubmitted() {
        let tmp = TempDir::new().unwrap();
        let ws = JobWorkspace::new(tmp.path());
        let script = "j = Job()\nj.setParametricInputData([['/a'], ['/b']])\n# <-- user settings\n# user settings -->\n";
        ws.input_dir("0").unwrap();
        fs::write(ws.script_path("0"), script).unwrap();

        let master = Job::new(JobRecord::new(0, "auto", BTreeMap::new()));
        crate::submission::setup_bulk_subjobs(&master, &[40, 41], script, &ws).unwrap();
        master.subjobs()[1].update_status(JobStatus::Failed);
        let registry = Arc::new(JobRegistry::new());
        registry.add(master.clone());

        let mock = MockService::new();
        mock.reply(
            "status(",
            ResultEnvelope::success(json!([["", "Waiting", "", "submitted"]])),
        );
        mock.reply("execfile(", ResultEnvelope::success(json!(77)));
        let auto = AutoResubmit {
            workspace: ws.clone(),
            max_attempts: 1,
        };
        let mut driver = make_driver(&mock, &registry, &ws, Some(auto));

        driver.tick();
        let resubmitted = &master.subjobs()[1];
        assert_eq!(resubmitted.status(), JobStatus::Submitted);
        assert_eq!(resubmitted.remote_id(), Some(77));

        // A second failure is beyond the limit.
        resubmitted.update_status(JobStatus::Failed);
        driver.tick();
        assert_eq!(resubmitted.status(), JobStatus::Failed);
        assert_eq!(mock.commands_matching("execfile(").len(), 1);
    }
}
