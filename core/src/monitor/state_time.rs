//! Remote per-phase timestamps.

use tracing::{debug, warn};

use crate::envelope::{Expect, Payload};
use crate::job::{Job, JobStatus};
use crate::remote::{commands, RemoteExecutor};


/// Phases with a remote timestamp, in lifecycle order.
const TRACKED: [JobStatus; 4] = [
    JobStatus::Running,
    JobStatus::Completing,
    JobStatus::Completed,
    JobStatus::Failed,
];

fn key_for(phase: JobStatus) -> &'static str {
    match phase {
        JobStatus::Running => "backend_running",
        JobStatus::Completing => "backend_completing",
        _ => "backend_final",
    }
}

fn is_final(phase: JobStatus) -> bool {
    matches!(phase, JobStatus::Completed | JobStatus::Failed)
}


/// Fetch the remote timestamp for `target` and for every earlier tracked
/// phase not yet recorded. Must be called before the job's status moves to
/// `target`; a job already in `target` is left untouched.
pub fn record_state_time(job: &Job, target: JobStatus, executor: &dyn RemoteExecutor) {
    if !TRACKED.contains(&target) || job.has_subjobs() {
        return;
    }
    let record = job.snapshot();
    if record.status == target {
        debug!(job = %record.fqid, status = %target, "state time already recorded");
        return;
    }
    let Some(remote_id) = record.remote_id else {
        return;
    };

    for phase in TRACKED {
        let key = key_for(phase);
        let is_target = phase == target;
        if !is_target {
            // Only intermediate phases; a final phase never precedes another.
            if is_final(phase) || record.timestamps.backend.contains_key(key) {
                continue;
            }
        }

        match executor.run(&commands::state_time(remote_id, phase.as_str())) {
            Ok(envelope) if envelope.is_ok() => {
                if let Some(Payload::Text(stamp)) = envelope.decode(Expect::Text) {
                    job.with_record(|r| r.timestamps.backend.insert(key.to_string(), stamp));
                    debug!(job = %record.fqid, key, "recorded remote state time");
                }
            }
            Ok(envelope) => {
                warn!(job = %record.fqid, phase = %phase, reason = %envelope.failure_message(), "could not fetch state time");
            }
            Err(e) => {
                warn!(job = %record.fqid, phase = %phase, error = %e, "could not fetch state time");
            }
        }

        if is_target {
            break;
        }
    }
}
