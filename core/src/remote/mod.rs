//! Remote job-management service seam.
//!
//! `RemoteService` opens one `RemoteSession` per pool worker; a session owns
//! that worker's credential and carries opaque command text to the service.
//! `ProcessService` is the production implementation, `MockService` the
//! test double. `RemoteExecutor` is what job-level code talks to: something
//! that runs one command and hands back the parsed envelope.

pub mod commands;
pub mod mock;
pub mod process;

use crate::envelope::ResultEnvelope;
use crate::error::Result;


/// One worker's authenticated channel to the remote service.
pub trait RemoteSession: Send {
    /// Liveness probe for this session's credential.
    fn credential_valid(&self) -> bool;

    /// Send one command and return the raw reply text. `Err` carries a
    /// transport-level failure message.
    fn send(&self, command: &str) -> std::result::Result<String, String>;
}


/// Factory for worker sessions plus a pool-level credential probe.
pub trait RemoteService: Send + Sync {
    fn open_session(&self, worker: &str) -> Result<Box<dyn RemoteSession>>;

    fn credential_valid(&self) -> bool;
}


/// Runs a single command to completion and returns its envelope.
///
/// Implemented by `WorkerPool` (enqueue and wait) and by `WorkerContext`
/// (execute directly on the current worker, used inside continuations).
pub trait RemoteExecutor {
    fn run(&self, command: &str) -> Result<ResultEnvelope>;
}
