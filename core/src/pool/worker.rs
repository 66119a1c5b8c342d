//! Worker execution contexts.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::envelope::ResultEnvelope;
use crate::error::{BackendError, Result};
use crate::remote::{RemoteExecutor, RemoteSession};


/// What a worker is doing right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy { command: String, timeout: Option<Duration> },
}

/// Snapshot of one worker for status listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    pub name: String,
    pub state: WorkerState,
}


/// One pool slot: a named worker and its credentialed session.
pub struct WorkerContext {
    name: String,
    session: Box<dyn RemoteSession>,
    state: Arc<Mutex<WorkerState>>,
}

impl WorkerContext {
    pub(crate) fn new(name: String, session: Box<dyn RemoteSession>) -> Self {
        WorkerContext {
            name,
            session,
            state: Arc::new(Mutex::new(WorkerState::Idle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn credential_valid(&self) -> bool {
        self.session.credential_valid()
    }

    pub(crate) fn state_handle(&self) -> Arc<Mutex<WorkerState>> {
        Arc::clone(&self.state)
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

impl RemoteExecutor for WorkerContext {
    /// Execute on this worker. Refuses to send anything when the credential
    /// is no longer valid; transport failures become failed envelopes.
    fn run(&self, command: &str) -> Result<ResultEnvelope> {
        if !self.session.credential_valid() {
            return Err(BackendError::ServiceUnavailable(format!(
                "worker {} has no valid credential",
                self.name
            )));
        }
        debug!(worker = %self.name, command, "executing remote command");
        Ok(match self.session.send(command) {
            Ok(raw) => ResultEnvelope::parse(&raw),
            Err(message) => ResultEnvelope::failure(message),
        })
    }
}
