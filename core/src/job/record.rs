//! The mutable record behind one tracked job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::status::JobStatus;
use crate::script::SettingValue;


/// What the remote service last told us about a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Minor status / detail text.
    #[serde(default)]
    pub status_info: String,
    /// Remote coarse status.
    #[serde(default)]
    pub remote_status: Option<String>,
    /// Site or computing element.
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub norm_cpu_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timestamps {
    /// Local wall-clock (ms since epoch) keyed by state name.
    #[serde(default)]
    pub local: BTreeMap<String, u64>,
    /// Remote timestamps keyed by `backend_running`, `backend_completing`,
    /// `backend_final`.
    #[serde(default)]
    pub backend: BTreeMap<String, String>,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Local id; the sub-job index for sub-jobs.
    pub id: u64,
    /// `<master>.<index>` for sub-jobs, the local id otherwise.
    pub fqid: String,
    #[serde(default)]
    pub name: String,
    pub status: JobStatus,
    #[serde(default)]
    pub remote_id: Option<u64>,
    #[serde(default)]
    pub diagnostics: Diagnostics,
    /// Applied to the script only at submit and resubmit time.
    #[serde(default)]
    pub settings: BTreeMap<String, SettingValue>,
    /// Logical file names this job reads.
    #[serde(default)]
    pub input_data: Vec<String>,
    /// Output file name patterns; may contain shell wildcards.
    #[serde(default)]
    pub output_files: Vec<String>,
    #[serde(default)]
    pub splitter: Option<String>,
    #[serde(default)]
    pub timestamps: Timestamps,
    /// Automatic resubmissions performed so far.
    #[serde(default)]
    pub auto_resubmits: u32,
}

impl JobRecord {
    pub fn new(id: u64, name: &str, settings: BTreeMap<String, SettingValue>) -> Self {
        JobRecord {
            id,
            fqid: id.to_string(),
            name: name.to_string(),
            status: JobStatus::New,
            remote_id: None,
            diagnostics: Diagnostics::default(),
            settings,
            input_data: Vec::new(),
            output_files: Vec::new(),
            splitter: None,
            timestamps: Timestamps::default(),
            auto_resubmits: 0,
        }
    }

    /// Forget everything a previous submission attempt produced. Local
    /// status is left alone.
    pub fn clear_submission(&mut self) {
        self.remote_id = None;
        self.diagnostics = Diagnostics::default();
    }

    /// A sub-job record derived from this one.
    pub fn child(&self, index: usize, remote_id: u64, dataset: Vec<String>) -> JobRecord {
        JobRecord {
            id: index as u64,
            fqid: format!("{}.{}", self.fqid, index),
            name: self.name.clone(),
            status: JobStatus::Submitted,
            remote_id: Some(remote_id),
            diagnostics: Diagnostics::default(),
            settings: self.settings.clone(),
            input_data: dataset,
            output_files: self.output_files.clone(),
            splitter: None,
            timestamps: Timestamps::default(),
            auto_resubmits: 0,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_submission_keeps_status_and_settings() {
        let mut rec = JobRecord::new(3, "analysis", BTreeMap::new());
        rec.status = JobStatus::Failed;
        rec.remote_id = Some(99);
        rec.diagnostics.location = Some("LCG.CERN.ch".into());
        rec.clear_submission();
        assert_eq!(rec.remote_id, None);
        assert_eq!(rec.diagnostics, Diagnostics::default());
        assert_eq!(rec.status, JobStatus::Failed);
    }

    #[test]
    fn child_copies_static_attributes() {
        let mut rec = JobRecord::new(7, "split", BTreeMap::new());
        rec.splitter = Some("SplitByFiles".into());
        rec.output_files = vec!["*.root".into()];
        let child = rec.child(2, 1002, vec!["/lhcb/a.dst".into()]);
        assert_eq!(child.fqid, "7.2");
        assert_eq!(child.id, 2);
        assert_eq!(child.remote_id, Some(1002));
        assert_eq!(child.splitter, None);
        assert_eq!(child.output_files, vec!["*.root".to_string()]);
        assert_eq!(child.status, JobStatus::Submitted);
    }

    #[test]
    fn record_deserializes_with_defaults() {
        let rec: JobRecord =
            serde_json::from_str(r#"{"id": 1, "fqid": "1", "status": "running"}"#).unwrap();
        assert_eq!(rec.status, JobStatus::Running);
        assert!(rec.settings.is_empty());
    }
}
