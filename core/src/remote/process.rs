//! Remote service backed by a helper program.
//!
//! Each command spawns `sh -c <program>`, writes the command text to its
//! stdin and reads one JSON envelope from stdout. The credential probe is a
//! separate shell command judged by its exit status.

use std::io::Write;
use std::process::{Command, Stdio};

use tracing::debug;

use super::{RemoteService, RemoteSession};
use crate::config::HelperConfig;
use crate::error::Result;


pub struct ProcessService {
    config: HelperConfig,
}

impl ProcessService {
    pub fn new(config: HelperConfig) -> Self {
        ProcessService { config }
    }
}

impl RemoteService for ProcessService {
    fn open_session(&self, worker: &str) -> Result<Box<dyn RemoteSession>> {
        debug!(worker, program = %self.config.program, "opening helper session");
        Ok(Box::new(ProcessSession {
            worker: worker.to_string(),
            program: self.config.program.clone(),
            probe: self.config.probe_command.clone(),
        }))
    }

    fn credential_valid(&self) -> bool {
        probe(self.config.probe_command.as_deref())
    }
}


struct ProcessSession {
    worker: String,
    program: String,
    probe: Option<String>,
}

impl RemoteSession for ProcessSession {
    fn credential_valid(&self) -> bool {
        probe(self.probe.as_deref())
    }

    fn send(&self, command: &str) -> std::result::Result<String, String> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.program)
            .env("GBK_WORKER", &self.worker)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("Failed to execute: {}", e))?;

        // A helper that exits without reading stdin is reported through its
        // exit status below, not as a broken pipe.
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin
                .write_all(command.as_bytes())
                .and_then(|_| stdin.write_all(b"\n"))
            {
                debug!(worker = %self.worker, error = %e, "helper closed stdin early");
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| format!("Failed to collect output: {}", e))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).to_string())
        }
    }
}


fn probe(command: Option<&str>) -> bool {
    match command {
        None => true,
        Some(cmd) => Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false),
    }
}
