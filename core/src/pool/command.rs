//! Queued commands and their dequeue order.

use std::cmp::Ordering;
use std::sync::mpsc;
use std::time::Duration;

use super::worker::WorkerContext;
use crate::envelope::ResultEnvelope;
use crate::error::Result;


/// Urgency used when the caller does not pick one.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Work to run after a non-blocking command completes. Runs on the worker
/// thread that executed the command, with that worker's context, so any
/// follow-up calls go out under the same credential.
pub type Continuation = Box<dyn FnOnce(ResultEnvelope, &WorkerContext) + Send + 'static>;


/// An opaque remote command. Lower `priority` runs first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub text: String,
    pub priority: u8,
    /// Caller's wait bound for blocking execution; `None` uses the pool
    /// default. Never interrupts the remote operation.
    pub timeout: Option<Duration>,
}

impl Command {
    pub fn new(text: impl Into<String>) -> Self {
        Command {
            text: text.into(),
            priority: DEFAULT_PRIORITY,
            timeout: None,
        }
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}


/// How the result of a queued command gets back to its submitter.
pub(crate) enum Reply {
    Blocking(mpsc::Sender<Result<ResultEnvelope>>),
    Async(Option<Continuation>),
}


/// A command waiting in a pool's queue. Ordered by priority (lower value
/// first), then by sequence number (FIFO within the same priority).
pub(crate) struct QueuedCommand {
    pub command: Command,
    pub reply: Reply,
    pub sequence: u64,
}

impl PartialEq for QueuedCommand {
    fn eq(&self, other: &Self) -> bool {
        self.command.priority == other.command.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedCommand {}

impl PartialOrd for QueuedCommand {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedCommand {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: the most urgent entry must compare greatest.
        other
            .command
            .priority
            .cmp(&self.command.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}
