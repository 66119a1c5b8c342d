//! On-disk layout of job workspaces.
//!
//! ```text
//! <root>/<id>/input/dirac-script.py
//! <root>/<id>/output/
//! <root>/<id>/debug/
//! <root>/<id>/job.json
//! <root>/<id>/<index>/...        sub-jobs
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use super::{Job, PersistedJob};
use crate::error::Result;
use crate::script::SCRIPT_FILE_NAME;


const RECORD_FILE: &str = "job.json";


#[derive(Debug, Clone)]
pub struct JobWorkspace {
    root: PathBuf,
}

impl JobWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        JobWorkspace { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a job; `3.1` maps to `<root>/3/1`.
    pub fn job_dir(&self, fqid: &str) -> PathBuf {
        fqid.split('.').fold(self.root.clone(), |dir, part| dir.join(part))
    }

    fn ensure(&self, fqid: &str, sub: &str) -> Result<PathBuf> {
        let dir = self.job_dir(fqid).join(sub);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn input_dir(&self, fqid: &str) -> Result<PathBuf> {
        self.ensure(fqid, "input")
    }

    pub fn output_dir(&self, fqid: &str) -> Result<PathBuf> {
        self.ensure(fqid, "output")
    }

    pub fn debug_dir(&self, fqid: &str) -> Result<PathBuf> {
        self.ensure(fqid, "debug")
    }

    /// Where the submission script of a job lives. Not created.
    pub fn script_path(&self, fqid: &str) -> PathBuf {
        self.job_dir(fqid).join("input").join(SCRIPT_FILE_NAME)
    }

    /// Remove everything inside the output directory, keeping the directory.
    pub fn clear_output(&self, fqid: &str) -> Result<()> {
        let dir = self.output_dir(fqid)?;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Persist a job and its sub-jobs as one record.
    pub fn commit(&self, job: &Job) -> Result<()> {
        let persisted = job.persisted();
        let dir = self.job_dir(&persisted.record.fqid);
        fs::create_dir_all(&dir)?;

        let json = serde_json::to_string_pretty(&persisted)?;
        let tmp_path = dir.join(".job.json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, dir.join(RECORD_FILE))?;
        Ok(())
    }

    pub fn load(&self, fqid: &str) -> Result<PersistedJob> {
        let content = fs::read_to_string(self.job_dir(fqid).join(RECORD_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Top-level job ids that have a committed record, ascending.
    pub fn stored_ids(&self) -> Result<Vec<u64>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<u64> = fs::read_dir(&self.root)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().join(RECORD_FILE).is_file())
            .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse().ok()))
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}
