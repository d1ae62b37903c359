//! The job-management system as seen by the balancer.
//!
//! `JobRepository` is the collaborator interface: fetch jobs by state,
//! fetch the worker roster, write a job's machine limit and read plugin
//! settings. `StoreRepository` implements it over a `FarmStore`.

use std::sync::Mutex;

use anyhow::{Context, anyhow};
use farm_core::JobState;
use farm_state::{FarmStore, JobRecord, WorkerRecord};
use tracing::debug;

pub trait JobRepository: Send + Sync {
    /// All jobs currently in `state`.
    fn jobs_in_state(&self, state: JobState) -> anyhow::Result<Vec<JobRecord>>;

    /// A single job by id.
    fn job(&self, job_id: &str) -> anyhow::Result<Option<JobRecord>>;

    /// The worker roster. `invalidate_cache` forces a fresh read.
    fn worker_info(&self, invalidate_cache: bool) -> anyhow::Result<Vec<WorkerRecord>>;

    /// Authoritative write of a job's worker cap.
    fn set_machine_limit_maximum(&self, job_id: &str, limit: u32) -> anyhow::Result<()>;

    /// A plugin-info value for `job`; absent or blank reads as `None`.
    fn job_plugin_info_value(&self, job: &JobRecord, key: &str) -> anyhow::Result<Option<String>>;
}

/// `JobRepository` over the embedded farm store.
///
/// The worker roster is cached between runs until a caller asks for
/// the cache to be invalidated.
pub struct StoreRepository {
    store: FarmStore,
    workers: Mutex<Option<Vec<WorkerRecord>>>,
}

impl StoreRepository {
    pub fn new(store: FarmStore) -> Self {
        Self {
            store,
            workers: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &FarmStore {
        &self.store
    }
}

impl JobRepository for StoreRepository {
    fn jobs_in_state(&self, state: JobState) -> anyhow::Result<Vec<JobRecord>> {
        self.store
            .list_jobs_in_state(state)
            .with_context(|| format!("listing {state} jobs"))
    }

    fn job(&self, job_id: &str) -> anyhow::Result<Option<JobRecord>> {
        self.store
            .get_job(job_id)
            .with_context(|| format!("reading job {job_id}"))
    }

    fn worker_info(&self, invalidate_cache: bool) -> anyhow::Result<Vec<WorkerRecord>> {
        let mut cache = self
            .workers
            .lock()
            .map_err(|_| anyhow!("worker cache lock poisoned"))?;

        if !invalidate_cache && let Some(workers) = cache.as_ref() {
            return Ok(workers.clone());
        }

        let workers = self.store.list_workers().context("listing workers")?;
        debug!(workers = workers.len(), "worker roster refreshed");
        *cache = Some(workers.clone());
        Ok(workers)
    }

    fn set_machine_limit_maximum(&self, job_id: &str, limit: u32) -> anyhow::Result<()> {
        self.store
            .set_machine_limit(job_id, limit)
            .with_context(|| format!("setting machine limit of {job_id} to {limit}"))
    }

    fn job_plugin_info_value(&self, job: &JobRecord, key: &str) -> anyhow::Result<Option<String>> {
        Ok(job.plugin_value(key).map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn worker(name: &str, is_active: bool) -> WorkerRecord {
        WorkerRecord {
            name: name.to_string(),
            is_active,
            host: None,
            last_seen: 0,
        }
    }

    #[test]
    fn worker_roster_is_cached_until_invalidated() {
        let store = FarmStore::open_in_memory().unwrap();
        store.put_worker(&worker("rn-01", true)).unwrap();
        let repo = StoreRepository::new(store.clone());

        assert_eq!(repo.worker_info(false).unwrap().len(), 1);

        store.put_worker(&worker("rn-02", true)).unwrap();
        assert_eq!(repo.worker_info(false).unwrap().len(), 1);
        assert_eq!(repo.worker_info(true).unwrap().len(), 2);
        assert_eq!(repo.worker_info(false).unwrap().len(), 2);
    }

    #[test]
    fn set_machine_limit_on_unknown_job_fails() {
        let repo = StoreRepository::new(FarmStore::open_in_memory().unwrap());
        let err = repo.set_machine_limit_maximum("ghost", 2).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn plugin_info_lookup() {
        let repo = StoreRepository::new(FarmStore::open_in_memory().unwrap());
        let job = JobRecord {
            id: "job-1".to_string(),
            name: "comp".to_string(),
            state: JobState::Active,
            priority: 10.0,
            rendering_tasks: 0,
            queued_tasks: 0,
            completed_tasks: 0,
            machine_limit: 0,
            plugin_info: HashMap::from([
                ("LicenseLimit".to_string(), "4".to_string()),
                ("Empty".to_string(), String::new()),
            ]),
            submitted_at: 0,
        };

        assert_eq!(
            repo.job_plugin_info_value(&job, "LicenseLimit").unwrap(),
            Some("4".to_string())
        );
        assert_eq!(repo.job_plugin_info_value(&job, "Empty").unwrap(), None);
        assert_eq!(repo.job_plugin_info_value(&job, "Missing").unwrap(), None);
    }
}
