//! CliCommand: the typed form of every `gbk` invocation.
//!
//! | Group | Commands |
//! |-------|----------|
//! | Jobs | `submit`, `resubmit`, `jobs`, `reset`, `monitor` |
//! | Remote | `kill`, `peek`, `sandbox`, `timedetails`, `debug`, `exec` |
//! | Pools | `queues` |
//! | Help | `help` |


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Render a template, submit it, and optionally watch it to the end.
    Submit {
        template: String,
        sandbox: Vec<String>,
        name: Option<String>,
        outputs: Vec<String>,
        watch: bool,
    },
    /// Resubmit a stored job or sub-job (`3` or `3.1`).
    Resubmit { job: String },
    /// List stored jobs.
    Jobs,
    /// Hand a job back to monitoring.
    Reset { job: String, subjobs: bool },
    /// Poll until every stored job is finished.
    Monitor,
    Kill { remote_id: u64 },
    Peek { remote_id: u64 },
    /// Download a job's output sandbox.
    Sandbox { job: String, dir: Option<String> },
    TimeDetails { job: String },
    Debug { remote_id: Option<u64> },
    /// Send a raw command and print the envelope.
    Exec { command: String },
    Queues,
    Help { topic: Option<String> },
}


/// A parsed command line: global options plus the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub config: Option<String>,
    pub log_file: Option<String>,
    pub command: CliCommand,
}
