//! gbk: command-line entry point for the grid job backend.
//!
//! # Usage
//!
//! ```text
//! gbk submit analysis.py --sandbox data.opts --watch
//! gbk jobs
//! gbk kill 1234
//! gbk --config grid.yaml queues
//! ```

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use gridbackend_core::backend::Backend;
use gridbackend_core::cli::{execute, parse_args};
use gridbackend_core::command::CliCommand;
use gridbackend_core::config::{self, BackendConfig};
use gridbackend_core::help::help_text;
use gridbackend_core::logging::init_logging;
use gridbackend_core::remote::process::ProcessService;
use tracing::debug;


const DEFAULT_CONFIG_FILE: &str = "gbk.yaml";


fn main() {
    let args: Vec<String> = std::env::args().collect();
    let arg_refs: Vec<&str> = args[1..].iter().map(|s| s.as_str()).collect();

    let invocation = match parse_args(&arg_refs) {
        Ok(inv) => inv,
        Err(e) => {
            eprintln!("gbk: {}", e);
            process::exit(1);
        }
    };

    // Help needs no backend.
    if let CliCommand::Help { topic } = &invocation.command {
        println!("{}", help_text(topic.as_deref()));
        return;
    }

    let _guard = match init_logging(invocation.log_file.as_deref().map(Path::new)) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("gbk: cannot open log file: {}", e);
            process::exit(1);
        }
    };

    let config = match load_config(invocation.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("gbk: {}", e);
            process::exit(1);
        }
    };

    let service = Arc::new(ProcessService::new(config.helper.clone()));
    let backend = match Backend::new(config, service) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("gbk: failed to start: {}", e);
            process::exit(1);
        }
    };
    match backend.load_jobs() {
        Ok(n) => debug!(jobs = n, "loaded stored jobs"),
        Err(e) => eprintln!("gbk: could not read job workspace: {}", e),
    }

    match execute(&backend, invocation.command) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("gbk error: {}", e);
            process::exit(1);
        }
    }
}


/// `--config` wins, then `GBK_CONFIG`, then `gbk.yaml` in the working
/// directory. Without any of them the built-in defaults apply.
fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }
    if let Ok(path) = std::env::var("GBK_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    local.exists().then_some(local)
}

fn load_config(explicit: Option<&str>) -> gridbackend_core::error::Result<BackendConfig> {
    match resolve_config_path(explicit) {
        Some(path) => config::load(&path),
        None => Ok(BackendConfig::default()),
    }
}
