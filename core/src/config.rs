//! Backend configuration, loaded from a YAML file.
//!
//! Every field has a default so a missing or partial file still yields a
//! usable configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BackendError, Result};
use crate::script::SettingValue;


/// What the monitoring loop does when a job's local status changed while a
/// status poll was in flight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatusConflictPolicy {
    /// Skip the job for this tick and warn.
    #[default]
    Defer,
    /// Warn, then apply the remote phase anyway.
    LastWriterWins,
}


/// How the production remote service reaches the grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HelperConfig {
    /// Shell command that reads one command on stdin and prints one JSON
    /// envelope on stdout.
    #[serde(default = "default_helper_program")]
    pub program: String,

    /// Shell command whose exit status says whether the credential is valid.
    #[serde(default = "default_probe_command")]
    pub probe_command: Option<String>,
}

impl Default for HelperConfig {
    fn default() -> Self {
        HelperConfig {
            program: default_helper_program(),
            probe_command: default_probe_command(),
        }
    }
}


#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// Workers serving user-initiated calls.
    #[serde(default = "default_pool_size")]
    pub user_pool_size: usize,

    /// Workers serving monitoring traffic.
    #[serde(default = "default_pool_size")]
    pub monitoring_pool_size: usize,

    /// Default wait for a blocking call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Fetch the output sandbox of jobs that fail.
    #[serde(default = "default_true")]
    pub failed_sandbox_download: bool,

    /// Name of the output manifest written into each job's output directory.
    #[serde(default = "default_locations_file_name")]
    pub locations_file_name: String,

    #[serde(default)]
    pub status_conflict_policy: StatusConflictPolicy,

    /// Seconds between monitoring ticks.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Root directory for job workspaces.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,

    /// Resubmit failed sub-jobs from the monitoring driver.
    #[serde(default)]
    pub auto_resubmit: bool,

    /// Upper bound on automatic resubmissions per sub-job.
    #[serde(default = "default_max_auto_resubmits")]
    pub max_auto_resubmits: u32,

    /// Settings given to every new job.
    #[serde(default = "default_settings")]
    pub default_settings: BTreeMap<String, SettingValue>,

    #[serde(default)]
    pub helper: HelperConfig,
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            user_pool_size: default_pool_size(),
            monitoring_pool_size: default_pool_size(),
            timeout_secs: default_timeout_secs(),
            failed_sandbox_download: true,
            locations_file_name: default_locations_file_name(),
            status_conflict_policy: StatusConflictPolicy::default(),
            poll_interval_secs: default_poll_interval_secs(),
            workspace_root: default_workspace_root(),
            auto_resubmit: false,
            max_auto_resubmits: default_max_auto_resubmits(),
            default_settings: default_settings(),
            helper: HelperConfig::default(),
        }
    }
}


fn default_pool_size() -> usize {
    3
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_locations_file_name() -> String {
    "__postprocesslocations__".into()
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_workspace_root() -> String {
    "gridjobs".into()
}

fn default_max_auto_resubmits() -> u32 {
    1
}

fn default_settings() -> BTreeMap<String, SettingValue> {
    let mut settings = BTreeMap::new();
    settings.insert("CPUTime".to_string(), SettingValue::Int(2 * 86400));
    settings
}

fn default_helper_program() -> String {
    "dirac-api-helper".into()
}

fn default_probe_command() -> Option<String> {
    Some("dirac-proxy-info --checkvalid".into())
}


/// Load a configuration file.
pub fn load(path: &Path) -> Result<BackendConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        BackendError::Config(format!("cannot read '{}': {}", path.display(), e))
    })?;
    parse(&content)
}

/// Parse a configuration from YAML text.
pub fn parse(content: &str) -> Result<BackendConfig> {
    let config: BackendConfig = serde_yaml::from_str(content)
        .map_err(|e| BackendError::Config(format!("invalid backend config: {}", e)))?;
    if config.user_pool_size == 0 || config.monitoring_pool_size == 0 {
        return Err(BackendError::Config("pool sizes must be at least 1".into()));
    }
    Ok(config)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let yaml = r#"
user_pool_size: 2
monitoring_pool_size: 4
timeout_secs: 10
failed_sandbox_download: false
locations_file_name: manifest.txt
status_conflict_policy: last_writer_wins
poll_interval_secs: 5
workspace_root: /tmp/jobs
auto_resubmit: true
max_auto_resubmits: 3
default_settings:
  CPUTime: 3600
  Destination: LCG.CERN.ch
helper:
  program: ./helper.sh
  probe_command: null
"#;
        let cfg = parse(yaml).unwrap();
        assert_eq!(cfg.user_pool_size, 2);
        assert_eq!(cfg.monitoring_pool_size, 4);
        assert_eq!(cfg.timeout(), Duration::from_secs(10));
        assert!(!cfg.failed_sandbox_download);
        assert_eq!(cfg.locations_file_name, "manifest.txt");
        assert_eq!(cfg.status_conflict_policy, StatusConflictPolicy::LastWriterWins);
        assert!(cfg.auto_resubmit);
        assert_eq!(cfg.max_auto_resubmits, 3);
        assert_eq!(cfg.default_settings["CPUTime"], SettingValue::Int(3600));
        assert_eq!(
            cfg.default_settings["Destination"],
            SettingValue::Str("LCG.CERN.ch".into())
        );
        assert_eq!(cfg.helper.program, "./helper.sh");
        assert_eq!(cfg.helper.probe_command, None);
    }

    #[test]
    fn empty_mapping_gives_defaults() {
        let cfg = parse("{}").unwrap();
        assert_eq!(cfg, BackendConfig::default());
        assert_eq!(cfg.default_settings["CPUTime"], SettingValue::Int(172800));
        assert_eq!(cfg.locations_file_name, "__postprocesslocations__");
        assert_eq!(cfg.status_conflict_policy, StatusConflictPolicy::Defer);
    }

    #[test]
    fn zero_pool_size_rejected() {
        let err = parse("user_pool_size: 0\n").unwrap_err();
        assert!(matches!(err, BackendError::Config(_)));
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = load(Path::new("/nonexistent/gbk.yaml")).unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
