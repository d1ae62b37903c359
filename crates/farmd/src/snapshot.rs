//! JSON farm snapshots for `farmd import`.

use std::path::Path;

use farm_state::{FarmStore, JobRecord, WorkerRecord};
use serde::Deserialize;

/// A set of jobs and workers exported from the job-management system.
#[derive(Debug, Default, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub jobs: Vec<JobRecord>,
    #[serde(default)]
    pub workers: Vec<WorkerRecord>,
}

impl Snapshot {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write every record into `store`. Returns (jobs, workers) written.
    pub fn apply(&self, store: &FarmStore) -> anyhow::Result<(usize, usize)> {
        for job in &self.jobs {
            store.put_job(job)?;
        }
        for worker in &self.workers {
            store.put_worker(worker)?;
        }
        Ok((self.jobs.len(), self.workers.len()))
    }
}
