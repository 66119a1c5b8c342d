//! Fixed-size pools of credentialed worker threads.
//!
//! A `WorkerPool` owns N worker threads, each with its own remote session.
//! Commands are queued in priority order (lower value first, FIFO within a
//! priority) and picked up by whichever worker is idle.
//!
//! - `execute` blocks the caller until the command ran or its timeout
//!   elapsed. The timeout only bounds the wait.
//! - `execute_nonblocking` returns immediately; the optional continuation
//!   runs on the worker thread once the command finished.
//!
//! A worker checks its credential before each command. With an invalid
//! credential nothing is sent: blocking callers get `ServiceUnavailable`,
//! continuations of non-blocking commands receive a failed envelope.
//!
//! Processes typically run two pools: one for user calls and one for
//! monitoring, so a slow monitoring cycle never delays a submission.

pub mod command;
pub mod worker;

use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::envelope::ResultEnvelope;
use crate::error::{BackendError, Result};
use crate::remote::{RemoteExecutor, RemoteService};

pub use command::{Command, Continuation, DEFAULT_PRIORITY};
use command::{QueuedCommand, Reply};
pub use worker::{WorkerContext, WorkerState, WorkerStatus};


// ---------------------------------------------------------------------------
// Shared queue
// ---------------------------------------------------------------------------

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueuedCommand>,
    next_sequence: u64,
    shutting_down: bool,
}

struct PoolShared {
    queue: Mutex<QueueState>,
    available: Condvar,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until a command is available. `None` once shutting down.
    fn next(&self) -> Option<QueuedCommand> {
        let mut state = self.lock();
        loop {
            if state.shutting_down {
                return None;
            }
            if let Some(queued) = state.heap.pop() {
                return Some(queued);
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}


// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

pub struct WorkerPool {
    name: String,
    service: Arc<dyn RemoteService>,
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    states: Vec<(String, Arc<Mutex<WorkerState>>)>,
    default_timeout: Duration,
}

impl WorkerPool {
    /// Open one session per worker and start the worker threads.
    pub fn new(
        name: &str,
        size: usize,
        service: Arc<dyn RemoteService>,
        default_timeout: Duration,
    ) -> Result<WorkerPool> {
        if size == 0 {
            return Err(BackendError::Config(format!("pool '{}' needs at least one worker", name)));
        }

        let shared = Arc::new(PoolShared {
            queue: Mutex::new(QueueState::default()),
            available: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(size);
        let mut states = Vec::with_capacity(size);
        for index in 0..size {
            let worker_name = format!("{}-worker-{}", name, index);
            let session = service.open_session(&worker_name)?;
            let context = WorkerContext::new(worker_name.clone(), session);
            states.push((worker_name.clone(), context.state_handle()));

            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(worker_name)
                .spawn(move || worker_loop(context, shared))?;
            workers.push(handle);
        }

        debug!(pool = name, size, "worker pool started");
        Ok(WorkerPool {
            name: name.to_string(),
            service,
            shared,
            workers: Mutex::new(workers),
            states,
            default_timeout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.states.len()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Pool-level credential liveness probe.
    pub fn proxy_valid(&self) -> bool {
        self.service.credential_valid()
    }

    fn enqueue(&self, command: Command, reply: Reply) -> Result<()> {
        let mut state = self.shared.lock();
        if state.shutting_down {
            return Err(BackendError::ServiceUnavailable(format!(
                "pool '{}' is shut down",
                self.name
            )));
        }
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.heap.push(QueuedCommand {
            command,
            reply,
            sequence,
        });
        drop(state);
        self.shared.available.notify_one();
        Ok(())
    }

    /// Run a command and wait for its envelope.
    pub fn execute(&self, command: Command) -> Result<ResultEnvelope> {
        let timeout = command.timeout.unwrap_or(self.default_timeout);
        let text = command.text.clone();
        let (tx, rx) = mpsc::channel();
        self.enqueue(command, Reply::Blocking(tx))?;
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(BackendError::Timeout {
                command: text,
                secs: timeout.as_secs(),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(BackendError::ServiceUnavailable(format!(
                "pool '{}' stopped before running '{}'",
                self.name, text
            ))),
        }
    }

    /// Queue a command and return at once.
    pub fn execute_nonblocking(
        &self,
        command: Command,
        continuation: Option<Continuation>,
    ) -> Result<()> {
        self.enqueue(command, Reply::Async(continuation))
    }

    /// Queue a command whose result is handed to `then` on the worker thread.
    pub fn execute_then<F>(&self, command: Command, then: F) -> Result<()>
    where
        F: FnOnce(ResultEnvelope, &WorkerContext) + Send + 'static,
    {
        self.execute_nonblocking(command, Some(Box::new(then)))
    }

    pub fn worker_status(&self) -> Vec<WorkerStatus> {
        self.states
            .iter()
            .map(|(name, state)| WorkerStatus {
                name: name.clone(),
                state: state.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            })
            .collect()
    }

    /// Pending command texts in the order they will be dequeued.
    pub fn queued_commands(&self) -> Vec<String> {
        let state = self.shared.lock();
        let mut pending: Vec<&QueuedCommand> = state.heap.iter().collect();
        pending.sort_by(|a, b| b.cmp(a));
        pending.iter().map(|q| q.command.text.clone()).collect()
    }

    /// Stop the workers. Commands still queued are dropped; their blocking
    /// callers see `ServiceUnavailable`. Running commands finish first.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            state.heap.clear();
        }
        self.shared.available.notify_all();

        let handles: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        let current = thread::current().id();
        for handle in handles {
            // A continuation may hold the last reference to its own pool.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!(pool = %self.name, "worker thread panicked");
            }
        }
        debug!(pool = %self.name, "worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl RemoteExecutor for WorkerPool {
    fn run(&self, command: &str) -> Result<ResultEnvelope> {
        self.execute(Command::new(command))
    }
}


fn worker_loop(context: WorkerContext, shared: Arc<PoolShared>) {
    while let Some(queued) = shared.next() {
        context.set_state(WorkerState::Busy {
            command: queued.command.text.clone(),
            timeout: queued.command.timeout,
        });
        dispatch(&context, queued);
        context.set_state(WorkerState::Idle);
    }
}

fn dispatch(context: &WorkerContext, queued: QueuedCommand) {
    let QueuedCommand { command, reply, .. } = queued;
    match reply {
        Reply::Blocking(tx) => {
            // The caller may have timed out already; nobody is left to tell.
            let _ = tx.send(context.run(&command.text));
        }
        Reply::Async(continuation) => {
            // A continuation always runs; a command that could not be sent
            // hands it a failed envelope.
            let envelope = context.run(&command.text).unwrap_or_else(|e| {
                warn!(worker = %context.name(), command = %command.text, error = %e, "queued command not sent");
                ResultEnvelope::failure(e.to_string())
            });
            if let Some(then) = continuation {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| then(envelope, context)));
                if outcome.is_err() {
                    error!(worker = %context.name(), command = %command.text, "continuation panicked");
                }
            }
        }
    }
}
