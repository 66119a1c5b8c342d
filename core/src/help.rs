//! Usage text for `gbk`.
//!
//! `gbk help` prints the overview; `gbk help <command>` prints detailed
//! usage for one command.


pub fn help_text(topic: Option<&str>) -> String {
    match topic {
        None => overview(),
        Some(t) => command_help(t).unwrap_or_else(|| {
            format!("Unknown help topic: '{}'. Run 'gbk help' for a list of commands.", t)
        }),
    }
}


fn overview() -> String {
    "\
gbk - grid job backend client

Usage: gbk [--config PATH] [--log FILE] <command> [args...]

Job commands:
  submit <template> [flags]    Render and submit a job script
  resubmit <job-id>            Resubmit a stored job or sub-job
  jobs                         List stored jobs
  reset <job-id> [--subjobs]   Hand a job back to monitoring
  monitor                      Poll until every stored job has finished

Remote commands:
  kill <remote-id>             Kill a remote job
  peek <remote-id>             Show the current output of a remote job
  sandbox <job-id> [--dir D]   Download a job's output sandbox
  timedetails <job-id>         Show the remote logging history of a job
  debug [<remote-id>]          Ping remote services, fetch pilot output
  exec <command>               Send a raw command, print the reply

Pool commands:
  queues                       Show workers and pending commands

Run 'gbk help <command>' for detailed help on a specific command."
        .into()
}


fn command_help(command: &str) -> Option<String> {
    let text = match command {
        "submit" => "\
gbk submit <template> [--sandbox FILE]... [--output PATTERN]... [--name NAME] [--watch]

Reads the script template, replaces ##INPUT_SANDBOX## with the sandbox file
list, fills the user-settings region with the default settings and submits
it through the user pool. A reply with a list of ids creates one sub-job per
parametric dataset. With --watch, polls until the job has finished.",
        "resubmit" => "\
gbk resubmit <job-id>

Reuses the job's previous script (or its master's parametric script for a
sub-job) with the current settings.",
        "jobs" => "\
gbk jobs

Lists stored jobs with status, remote id and name.",
        "reset" => "\
gbk reset <job-id> [--subjobs]

Clears the output directory and sets the job back to submitted. Refused for
jobs that are submitting or killed. With --subjobs, completing and failed
sub-jobs are reset as well.",
        "monitor" => "\
gbk monitor

Runs monitoring ticks in the foreground until every stored job is finished.",
        "kill" => "\
gbk kill <remote-id>

Kills the remote job. A stored job holding that id is marked killed.",
        "peek" => "\
gbk peek <remote-id>

Prints the current standard output of a running remote job.",
        "sandbox" => "\
gbk sandbox <job-id> [--dir DIR]

Downloads the output sandbox into DIR, or the job's output directory.",
        "timedetails" => "\
gbk timedetails <job-id>

Prints the remote logging history of a submitted job.",
        "debug" => "\
gbk debug [<remote-id>]

Pings every remote service. With a remote id of a stored job, also fetches
the pilot output into the job's debug directory.",
        "exec" => "\
gbk exec <command>

Sends the command text verbatim through the user pool and prints the reply
envelope.",
        "queues" => "\
gbk queues

Shows each worker of the user and monitoring pools with the command it is
running, followed by the commands still queued.",
        "help" => "\
gbk help [command]",
        _ => return None,
    };
    Some(text.to_string())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overview_lists_commands() {
        let text = help_text(None);
        for cmd in ["submit", "kill", "peek", "debug", "exec", "queues", "reset"] {
            assert!(text.contains(cmd), "overview missing {}", cmd);
        }
    }

    #[test]
    fn command_topic() {
        assert!(help_text(Some("submit")).contains("##INPUT_SANDBOX##"));
    }

    #[test]
    fn unknown_topic() {
        assert!(help_text(Some("bogus")).starts_with("Unknown help topic"));
    }
}
