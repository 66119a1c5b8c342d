//! Command text builders. Commands are sent verbatim; the remote side
//! evaluates them as function calls.

use std::path::Path;

pub fn execfile(script: &Path) -> String {
    format!("execfile('{}')", script.display())
}

pub fn kill(id: u64) -> String {
    format!("kill({})", id)
}

pub fn peek(id: u64) -> String {
    format!("peek({})", id)
}

/// Batched status query: `status([1, 2, 3])`.
pub fn status(ids: &[u64]) -> String {
    let parts: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    format!("status([{}])", parts.join(", "))
}

pub fn get_output_sandbox(id: u64, dir: &Path) -> String {
    format!("getOutputSandbox({},'{}')", id, dir.display())
}

pub fn norm_cpu_time(id: u64) -> String {
    format!("normCPUTime({})", id)
}

pub fn output_data_info(id: u64) -> String {
    format!("getOutputDataInfo({})", id)
}

pub fn state_time(id: u64, phase: &str) -> String {
    format!("getStateTime({},'{}')", id, phase)
}

pub fn timedetails(id: u64) -> String {
    format!("timedetails({})", id)
}

pub fn service_ports() -> String {
    "getServicePorts()".into()
}

pub fn ping(system: &str, service: &str) -> String {
    format!("ping('{}','{}')", system, service)
}

pub fn pilot_output(id: u64, dir: &Path) -> String {
    format!("getJobPilotOutput({},'{}')", id, dir.display())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_forms() {
        assert_eq!(status(&[1, 2, 3]), "status([1, 2, 3])");
        assert_eq!(status(&[]), "status([])");
        assert_eq!(kill(42), "kill(42)");
        assert_eq!(
            get_output_sandbox(42, Path::new("/w/42/output")),
            "getOutputSandbox(42,'/w/42/output')"
        );
        assert_eq!(state_time(7, "running"), "getStateTime(7,'running')");
        assert_eq!(execfile(Path::new("/w/1/input/dirac-script.py")), "execfile('/w/1/input/dirac-script.py')");
    }
}
