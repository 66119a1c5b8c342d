//! Error types for the grid backend.

use thiserror::Error;

/// Errors raised by submission, resubmission, job operations and the pools.
///
/// Monitoring never surfaces these to its caller; it logs and moves on to
/// the next job. User-triggered operations return them unchanged.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The submit envelope was not ok, or its value had an unexpected shape.
    #[error("error submitting job: {0}")]
    Submission(String),

    /// Bulk id count differs from the parametric datasets in the script, or
    /// a sub-job's dataset no longer matches the script.
    #[error("dataset mismatch: {0}")]
    DatasetMismatch(String),

    /// No prior submission script exists for a resubmission.
    #[error("no submission script found: {0}")]
    MissingScript(String),

    /// Worker credential invalid. Callers treat this as "try again later".
    #[error("remote service unavailable: {0}")]
    ServiceUnavailable(String),

    /// A single remote command came back with `ok = false`.
    #[error("remote call failed{}: {message}", job_suffix(.remote_id))]
    RemoteCall {
        remote_id: Option<u64>,
        message: String,
    },

    /// A blocking call gave up waiting. The command itself keeps running.
    #[error("timed out after {secs}s waiting for '{command}'")]
    Timeout { command: String, secs: u64 },

    /// Batch auto-resubmission where no job could be resubmitted.
    #[error("incomplete submission of job {job}: {reason}")]
    IncompleteSubmission { job: String, reason: String },

    /// The submission script does not follow the expected layout.
    #[error("malformed submission script: {0}")]
    Script(String),

    #[error("invalid job state: {0}")]
    InvalidState(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn job_suffix(remote_id: &Option<u64>) -> String {
    match remote_id {
        Some(id) => format!(" for remote job {}", id),
        None => String::new(),
    }
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;
