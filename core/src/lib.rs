//! Client-side backend for a remote grid workload service.
//!
//! Jobs are rendered into scripts, submitted through a pool of persistent
//! worker sessions, polled for status on a second pool and finalised
//! (sandbox download, output manifest, timestamps) once they finish.

pub mod backend;
pub mod cli;
pub mod command;
pub mod config;
pub mod envelope;
pub mod error;
pub mod help;
pub mod job;
pub mod logging;
pub mod monitor;
pub mod ops;
pub mod pool;
pub mod remote;
pub mod script;
pub mod submission;
