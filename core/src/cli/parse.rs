use crate::command::{CliCommand, Invocation};


/// Parse CLI arguments into an `Invocation`.
///
/// Global options (`--config PATH`, `--log FILE`) come before the command.
/// Arguments are expected WITHOUT the program name (i.e., `args` should be
/// `["kill", "42"]`, not `["gbk", "kill", "42"]`).
pub fn parse_args(args: &[&str]) -> Result<Invocation, String> {
    let mut config = None;
    let mut log_file = None;
    let mut i = 0;
    while i < args.len() {
        match args[i] {
            "--config" => {
                i += 1;
                config = Some(take_arg(args, i, "--config")?);
            }
            "--log" => {
                i += 1;
                log_file = Some(take_arg(args, i, "--log")?);
            }
            _ => break,
        }
        i += 1;
    }

    let command = parse_command(&args[i..])?;
    Ok(Invocation {
        config,
        log_file,
        command,
    })
}

fn parse_command(args: &[&str]) -> Result<CliCommand, String> {
    if args.is_empty() {
        return Err("No command specified. Run 'gbk help' for usage.".into());
    }

    match args[0] {
        "submit" => parse_submit(args),
        "resubmit" => Ok(CliCommand::Resubmit {
            job: positional(args, "Usage: gbk resubmit <job-id>")?,
        }),
        "jobs" => Ok(CliCommand::Jobs),
        "reset" => parse_reset(args),
        "monitor" => Ok(CliCommand::Monitor),
        "kill" => Ok(CliCommand::Kill {
            remote_id: remote_id(args, "Usage: gbk kill <remote-id>")?,
        }),
        "peek" => Ok(CliCommand::Peek {
            remote_id: remote_id(args, "Usage: gbk peek <remote-id>")?,
        }),
        "sandbox" => parse_sandbox(args),
        "timedetails" => Ok(CliCommand::TimeDetails {
            job: positional(args, "Usage: gbk timedetails <job-id>")?,
        }),
        "debug" => parse_debug(args),
        "exec" => parse_exec(args),
        "queues" => Ok(CliCommand::Queues),
        "help" => Ok(CliCommand::Help {
            topic: args.get(1).map(|t| t.to_string()),
        }),
        _ => Err(format!("Unknown command: '{}'", args[0])),
    }
}


// ---------------------------------------------------------------------------
// Sub-parsers
// ---------------------------------------------------------------------------

/// `gbk submit <template> [--sandbox FILE]... [--output PATTERN]... [--name NAME] [--watch]`
fn parse_submit(args: &[&str]) -> Result<CliCommand, String> {
    if args.len() < 2 {
        return Err("Usage: gbk submit <template> [--sandbox FILE]... [--output PATTERN]... [--name NAME] [--watch]".into());
    }
    let template = args[1].to_string();
    let mut sandbox = Vec::new();
    let mut outputs = Vec::new();
    let mut name = None;
    let mut watch = false;

    let rest = &args[2..];
    let mut i = 0;
    while i < rest.len() {
        match rest[i] {
            "--sandbox" => {
                i += 1;
                sandbox.push(take_arg(rest, i, "--sandbox")?);
            }
            "--output" => {
                i += 1;
                outputs.push(take_arg(rest, i, "--output")?);
            }
            "--name" => {
                i += 1;
                name = Some(take_arg(rest, i, "--name")?);
            }
            "--watch" => watch = true,
            other => return Err(format!("Unknown flag for submit: '{}'", other)),
        }
        i += 1;
    }
    Ok(CliCommand::Submit {
        template,
        sandbox,
        name,
        outputs,
        watch,
    })
}

/// `gbk reset <job-id> [--subjobs]`
fn parse_reset(args: &[&str]) -> Result<CliCommand, String> {
    let job = positional(args, "Usage: gbk reset <job-id> [--subjobs]")?;
    let subjobs = match args.get(2) {
        None => false,
        Some(&"--subjobs") => true,
        Some(other) => return Err(format!("Unknown flag for reset: '{}'", other)),
    };
    Ok(CliCommand::Reset { job, subjobs })
}

/// `gbk sandbox <job-id> [--dir DIR]`
fn parse_sandbox(args: &[&str]) -> Result<CliCommand, String> {
    let job = positional(args, "Usage: gbk sandbox <job-id> [--dir DIR]")?;
    let dir = match args.get(2) {
        None => None,
        Some(&"--dir") => Some(take_arg(args, 3, "--dir")?),
        Some(other) => return Err(format!("Unknown flag for sandbox: '{}'", other)),
    };
    Ok(CliCommand::Sandbox { job, dir })
}

/// `gbk debug [<remote-id>]`
fn parse_debug(args: &[&str]) -> Result<CliCommand, String> {
    let remote_id = match args.get(1) {
        Some(raw) => Some(parse_id(raw)?),
        None => None,
    };
    Ok(CliCommand::Debug { remote_id })
}

/// `gbk exec <command text>`; the remaining words are joined with spaces.
fn parse_exec(args: &[&str]) -> Result<CliCommand, String> {
    if args.len() < 2 {
        return Err("Usage: gbk exec <command>".into());
    }
    Ok(CliCommand::Exec {
        command: args[1..].join(" "),
    })
}


// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn positional(args: &[&str], usage: &str) -> Result<String, String> {
    args.get(1)
        .map(|s| s.to_string())
        .ok_or_else(|| usage.to_string())
}

fn remote_id(args: &[&str], usage: &str) -> Result<u64, String> {
    parse_id(&positional(args, usage)?)
}

fn parse_id(raw: &str) -> Result<u64, String> {
    raw.parse()
        .map_err(|_| format!("Invalid remote id: '{}'", raw))
}

fn take_arg(args: &[&str], index: usize, flag: &str) -> Result<String, String> {
    if index >= args.len() {
        return Err(format!("{} requires a value", flag));
    }
    Ok(args[index].into())
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn command(args: &[&str]) -> CliCommand {
        parse_args(args).unwrap().command
    }

    #[test]
    fn empty_args() {
        assert!(parse_args(&[]).is_err());
    }

    #[test]
    fn unknown_command() {
        assert!(parse_args(&["bogus"]).is_err());
    }

    #[test]
    fn global_options() {
        let inv = parse_args(&["--config", "grid.yaml", "--log", "gbk.log", "queues"]).unwrap();
        assert_eq!(inv.config.as_deref(), Some("grid.yaml"));
        assert_eq!(inv.log_file.as_deref(), Some("gbk.log"));
        assert_eq!(inv.command, CliCommand::Queues);
    }

    #[test]
    fn config_missing_value() {
        assert!(parse_args(&["--config"]).is_err());
    }

    #[test]
    fn submit_minimal() {
        assert_eq!(
            command(&["submit", "job.py"]),
            CliCommand::Submit {
                template: "job.py".into(),
                sandbox: vec![],
                name: None,
                outputs: vec![],
                watch: false,
            }
        );
    }

    #[test]
    fn submit_all_flags() {
        let cmd = command(&[
            "submit", "job.py", "--sandbox", "a.txt", "--sandbox", "b.opts", "--output", "*.root",
            "--name", "ana", "--watch",
        ]);
        assert_eq!(
            cmd,
            CliCommand::Submit {
                template: "job.py".into(),
                sandbox: vec!["a.txt".into(), "b.opts".into()],
                name: Some("ana".into()),
                outputs: vec!["*.root".into()],
                watch: true,
            }
        );
    }

    #[test]
    fn submit_unknown_flag() {
        assert!(parse_args(&["submit", "job.py", "--fast"]).is_err());
    }

    #[test]
    fn kill_and_peek() {
        assert_eq!(command(&["kill", "42"]), CliCommand::Kill { remote_id: 42 });
        assert_eq!(command(&["peek", "7"]), CliCommand::Peek { remote_id: 7 });
        assert!(parse_args(&["kill", "abc"]).is_err());
        assert!(parse_args(&["peek"]).is_err());
    }

    #[test]
    fn reset_with_subjobs() {
        assert_eq!(
            command(&["reset", "3", "--subjobs"]),
            CliCommand::Reset { job: "3".into(), subjobs: true }
        );
        assert!(parse_args(&["reset", "3", "--all"]).is_err());
    }

    #[test]
    fn sandbox_dir() {
        assert_eq!(
            command(&["sandbox", "3.1", "--dir", "/tmp/out"]),
            CliCommand::Sandbox { job: "3.1".into(), dir: Some("/tmp/out".into()) }
        );
        assert!(parse_args(&["sandbox", "3", "--dir"]).is_err());
    }

    #[test]
    fn debug_optional_id() {
        assert_eq!(command(&["debug"]), CliCommand::Debug { remote_id: None });
        assert_eq!(command(&["debug", "9"]), CliCommand::Debug { remote_id: Some(9) });
    }

    #[test]
    fn exec_joins_words() {
        assert_eq!(
            command(&["exec", "getJobs(", ")"]),
            CliCommand::Exec { command: "getJobs( )".into() }
        );
    }

    #[test]
    fn help_topic() {
        assert_eq!(command(&["help"]), CliCommand::Help { topic: None });
        assert_eq!(command(&["help", "submit"]), CliCommand::Help { topic: Some("submit".into()) });
    }
}
