//! FarmStore — redb-backed job and worker repository.
//!
//! Provides typed CRUD over job records and the worker roster. Values
//! are JSON-serialized into redb's `&[u8]` columns. Both on-disk and
//! in-memory backends are supported (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use farm_core::JobState;
use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe repository backed by redb.
#[derive(Clone)]
pub struct FarmStore {
    db: Arc<Database>,
}

impl FarmStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "farm store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory farm store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.open_table(WORKERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn put<T: Serialize>(
        &self,
        table_def: RecordTable,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(
        &self,
        table_def: RecordTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list<T: DeserializeOwned>(
        &self,
        table_def: RecordTable,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: T =
                serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
            results.push(record);
        }
        Ok(results)
    }

    fn delete(&self, table_def: RecordTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Insert or update a job record.
    pub fn put_job(&self, job: &JobRecord) -> StateResult<()> {
        self.put(JOBS, &job.id, job)?;
        debug!(job = %job.id, "job stored");
        Ok(())
    }

    pub fn get_job(&self, job_id: &str) -> StateResult<Option<JobRecord>> {
        self.get(JOBS, job_id)
    }

    /// List all jobs, ordered by id.
    pub fn list_jobs(&self) -> StateResult<Vec<JobRecord>> {
        self.list(JOBS)
    }

    /// List jobs currently in `state`.
    pub fn list_jobs_in_state(&self, state: JobState) -> StateResult<Vec<JobRecord>> {
        Ok(self
            .list_jobs()?
            .into_iter()
            .filter(|job| job.state == state)
            .collect())
    }

    /// Delete a job by id. Returns true if it existed.
    pub fn delete_job(&self, job_id: &str) -> StateResult<bool> {
        let existed = self.delete(JOBS, job_id)?;
        debug!(job = %job_id, existed, "job deleted");
        Ok(existed)
    }

    /// Overwrite a job's machine limit inside a single write transaction.
    pub fn set_machine_limit(&self, job_id: &str, limit: u32) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            let mut job: JobRecord = match table.get(job_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?
                }
                None => return Err(StateError::JobNotFound(job_id.to_string())),
            };
            job.machine_limit = limit;
            let bytes = serde_json::to_vec(&job).map_err(map_err!(Encode))?;
            table
                .insert(job_id, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(job = %job_id, limit, "machine limit stored");
        Ok(())
    }

    // ── Workers ────────────────────────────────────────────────────

    /// Insert or update a worker record.
    pub fn put_worker(&self, worker: &WorkerRecord) -> StateResult<()> {
        self.put(WORKERS, &worker.name, worker)
    }

    pub fn get_worker(&self, name: &str) -> StateResult<Option<WorkerRecord>> {
        self.get(WORKERS, name)
    }

    /// List the full worker roster, active or not.
    pub fn list_workers(&self) -> StateResult<Vec<WorkerRecord>> {
        self.list(WORKERS)
    }

    /// Delete a worker by name. Returns true if it existed.
    pub fn delete_worker(&self, name: &str) -> StateResult<bool> {
        self.delete(WORKERS, name)
    }
}
