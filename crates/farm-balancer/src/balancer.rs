//! Balancer — one balancing run against the job repository.
//!
//! Reads a fresh snapshot of active jobs and workers, hands it to the
//! allocator and publishes the resulting machine limits. Every run is
//! independent; nothing is carried over between runs.

use std::collections::HashMap;
use std::sync::Arc;

use farm_allocator::{AllocationPlan, RejectedJob, balance_with, parse_license_limit};
use farm_core::{BalancerSettings, JobId};
use farm_state::JobRecord;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BalanceError, BalanceResult};
use crate::events::{EventHub, FarmEvent, Subscription};
use crate::repository::JobRepository;

/// Knobs for a single run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceOptions {
    /// Compute the plan without writing anything.
    pub dry_run: bool,
    /// Write every limit, even ones that already match the stored value.
    pub force: bool,
}

/// A machine-limit write that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedWrite {
    pub job: JobId,
    pub limit: u32,
    pub error: String,
}

/// What a balancing run computed and published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub plan: AllocationPlan,
    pub dry_run: bool,
    /// Jobs whose new limit was written.
    pub published: Vec<JobId>,
    /// Jobs whose stored limit already matched.
    pub unchanged: Vec<JobId>,
    pub failed: Vec<FailedWrite>,
}

/// Runs balancing passes against a job repository.
pub struct Balancer {
    repo: Arc<dyn JobRepository>,
    settings: BalancerSettings,
}

impl Balancer {
    pub fn new(repo: Arc<dyn JobRepository>, settings: BalancerSettings) -> Self {
        Self { repo, settings }
    }

    pub fn settings(&self) -> &BalancerSettings {
        &self.settings
    }

    /// Register this balancer's event handler on `hub`.
    ///
    /// The handler stays registered for as long as the returned
    /// `Subscription` lives.
    pub fn attach(self: &Arc<Self>, hub: &EventHub) -> Subscription {
        let balancer = Arc::clone(self);
        hub.subscribe("balancer", move |event| {
            balancer.handle(event)?;
            Ok(())
        })
    }

    /// React to a farm event.
    pub fn handle(&self, event: &FarmEvent) -> BalanceResult<RunSummary> {
        match event {
            FarmEvent::JobSubmitted(job_id) => self.on_job_submitted(job_id),
            FarmEvent::HouseCleaning => self.on_house_cleaning(),
        }
    }

    /// A new job entered the farm: optionally cap it by license, then rebalance.
    pub fn on_job_submitted(&self, job_id: &str) -> BalanceResult<RunSummary> {
        info!(job = %job_id, "job submitted");
        if self.settings.cap_on_submit
            && let Err(e) = self.cap_submitted_job(job_id)
        {
            warn!(job = %job_id, error = %e, "could not apply license cap on submit");
        }
        self.balance()
    }

    /// Periodic maintenance tick.
    pub fn on_house_cleaning(&self) -> BalanceResult<RunSummary> {
        debug!("house cleaning");
        self.balance()
    }

    pub fn balance(&self) -> BalanceResult<RunSummary> {
        self.balance_with_options(BalanceOptions::default())
    }

    pub fn balance_with_options(&self, options: BalanceOptions) -> BalanceResult<RunSummary> {
        info!("starting balancing of active jobs");

        let jobs = self.repo.jobs_in_state(self.settings.active_state)?;
        let workers = self.repo.worker_info(self.settings.invalidate_worker_cache)?;
        info!(
            jobs = jobs.len(),
            workers = workers.len(),
            "fetched balancing snapshot"
        );

        // License values come from the repository; a failed lookup
        // excludes that job only.
        let mut licenses: HashMap<JobId, Option<String>> = HashMap::with_capacity(jobs.len());
        let mut lookup_failures = Vec::new();
        for job in &jobs {
            match self
                .repo
                .job_plugin_info_value(job, &self.settings.license_limit_key)
            {
                Ok(value) => {
                    licenses.insert(job.id.clone(), value);
                }
                Err(e) => {
                    warn!(job = %job.id, error = %e, "license lookup failed, job excluded");
                    lookup_failures.push(RejectedJob {
                        id: job.id.clone(),
                        reason: format!("license lookup failed: {e}"),
                    });
                }
            }
        }
        let usable: Vec<&JobRecord> = jobs
            .iter()
            .filter(|job| licenses.contains_key(&job.id))
            .collect();

        let mut plan = balance_with(
            &usable,
            &workers,
            |worker| worker.is_active,
            |job| job.id.clone(),
            |job| job.priority,
            |job| job.pending_work(),
            |job| licenses.get(&job.id).cloned().flatten(),
            self.settings.zero_priority,
        )?;
        plan.rejected.extend(lookup_failures);

        info!(
            active_workers = plan.active_workers,
            total_priority = plan.total_priority,
            reclaimed = plan.reclaimed,
            rejected = plan.rejected.len(),
            "allocation computed"
        );

        let mut summary = RunSummary {
            plan,
            dry_run: options.dry_run,
            published: Vec::new(),
            unchanged: Vec::new(),
            failed: Vec::new(),
        };
        if options.dry_run {
            return Ok(summary);
        }

        let current: HashMap<&str, u32> = jobs
            .iter()
            .map(|job| (job.id.as_str(), job.machine_limit))
            .collect();

        for alloc in &summary.plan.allocations {
            if !options.force && current.get(alloc.id.as_str()) == Some(&alloc.limit) {
                summary.unchanged.push(alloc.id.clone());
                continue;
            }
            match self.write_limit(&alloc.id, alloc.limit) {
                Ok(()) => {
                    info!(job = %alloc.id, limit = alloc.limit, "machine limit published");
                    summary.published.push(alloc.id.clone());
                }
                Err(e) => {
                    warn!(job = %alloc.id, error = %e, "giving up on machine limit");
                    summary.failed.push(FailedWrite {
                        job: alloc.id.clone(),
                        limit: alloc.limit,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            published = summary.published.len(),
            unchanged = summary.unchanged.len(),
            failed = summary.failed.len(),
            "balancing finished"
        );
        Ok(summary)
    }

    /// Write a machine limit, retrying up to `write_retries` times.
    fn write_limit(&self, job_id: &str, limit: u32) -> BalanceResult<()> {
        let attempts = self.settings.write_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.repo.set_machine_limit_maximum(job_id, limit) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(job = %job_id, attempt, attempts, error = %e, "machine limit write failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(BalanceError::WriteFailed {
            job: job_id.to_string(),
            attempts,
            last_error,
        })
    }

    fn cap_submitted_job(&self, job_id: &str) -> BalanceResult<()> {
        let job = self
            .repo
            .job(job_id)?
            .ok_or_else(|| BalanceError::JobNotFound(job_id.to_string()))?;
        let raw = self
            .repo
            .job_plugin_info_value(&job, &self.settings.license_limit_key)?;

        if let Some(limit) = parse_license_limit(&job.id, raw.as_deref())? {
            self.write_limit(&job.id, limit)?;
            info!(job = %job.id, limit, "license cap applied to submitted job");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use farm_core::{JobState, ZeroPriorityPolicy};
    use farm_state::{FarmStore, WorkerRecord};

    use crate::repository::StoreRepository;

    fn test_job(id: &str, priority: f64, queued: i64, license: Option<&str>) -> JobRecord {
        let mut plugin_info = HashMap::new();
        if let Some(l) = license {
            plugin_info.insert("LicenseLimit".to_string(), l.to_string());
        }
        JobRecord {
            id: id.to_string(),
            name: format!("{id}-name"),
            state: JobState::Active,
            priority,
            rendering_tasks: 0,
            queued_tasks: queued,
            completed_tasks: 0,
            machine_limit: 0,
            plugin_info,
            submitted_at: 1000,
        }
    }

    fn seed(store: &FarmStore, workers: usize, inactive: usize) {
        for i in 0..workers {
            store
                .put_worker(&WorkerRecord {
                    name: format!("rn-{i:02}"),
                    is_active: true,
                    host: None,
                    last_seen: 1000,
                })
                .unwrap();
        }
        for i in 0..inactive {
            store
                .put_worker(&WorkerRecord {
                    name: format!("off-{i:02}"),
                    is_active: false,
                    host: None,
                    last_seen: 0,
                })
                .unwrap();
        }
    }

    fn balancer_over(store: &FarmStore) -> Balancer {
        Balancer::new(
            Arc::new(StoreRepository::new(store.clone())),
            BalancerSettings::default(),
        )
    }

    /// Fails the first `failures` writes for `flaky_job`, then delegates.
    struct FlakyRepository {
        inner: StoreRepository,
        flaky_job: String,
        failures: AtomicU32,
        attempts: Mutex<Vec<String>>,
    }

    impl JobRepository for FlakyRepository {
        fn jobs_in_state(&self, state: JobState) -> anyhow::Result<Vec<JobRecord>> {
            self.inner.jobs_in_state(state)
        }

        fn job(&self, job_id: &str) -> anyhow::Result<Option<JobRecord>> {
            self.inner.job(job_id)
        }

        fn worker_info(&self, invalidate_cache: bool) -> anyhow::Result<Vec<WorkerRecord>> {
            self.inner.worker_info(invalidate_cache)
        }

        fn set_machine_limit_maximum(&self, job_id: &str, limit: u32) -> anyhow::Result<()> {
            self.attempts.lock().unwrap().push(job_id.to_string());
            if job_id == self.flaky_job
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                anyhow::bail!("repository unavailable");
            }
            self.inner.set_machine_limit_maximum(job_id, limit)
        }

        fn job_plugin_info_value(
            &self,
            job: &JobRecord,
            key: &str,
        ) -> anyhow::Result<Option<String>> {
            if job.id == "broken-lookup" {
                anyhow::bail!("plugin info unavailable");
            }
            self.inner.job_plugin_info_value(job, key)
        }
    }

    fn flaky(store: &FarmStore, flaky_job: &str, failures: u32) -> Arc<FlakyRepository> {
        Arc::new(FlakyRepository {
            inner: StoreRepository::new(store.clone()),
            flaky_job: flaky_job.to_string(),
            failures: AtomicU32::new(failures),
            attempts: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn balance_publishes_limits_to_store() {
        let store = FarmStore::open_in_memory().unwrap();
        seed(&store, 10, 3);
        store.put_job(&test_job("a", 90.0, 50, None)).unwrap();
        store.put_job(&test_job("b", 10.0, 50, None)).unwrap();

        let summary = balancer_over(&store).balance().unwrap();

        assert_eq!(summary.plan.active_workers, 10);
        assert_eq!(summary.published.len(), 2);
        assert_eq!(store.get_job("a").unwrap().unwrap().machine_limit, 9);
        assert_eq!(store.get_job("b").unwrap().unwrap().machine_limit, 1);
    }

    #[test]
    fn only_active_jobs_are_balanced() {
        let store = FarmStore::open_in_memory().unwrap();
        seed(&store, 4, 0);
        store.put_job(&test_job("a", 50.0, 50, None)).unwrap();
        let mut suspended = test_job("s", 50.0, 50, None);
        suspended.state = JobState::Suspended;
        suspended.machine_limit = 7;
        store.put_job(&suspended).unwrap();

        let summary = balancer_over(&store).balance().unwrap();

        assert_eq!(summary.plan.limit_for("a"), Some(4));
        assert_eq!(summary.plan.limit_for("s"), None);
        assert_eq!(store.get_job("s").unwrap().unwrap().machine_limit, 7);
    }

    #[test]
    fn second_run_changes_nothing() {
        let store = FarmStore::open_in_memory().unwrap();
        seed(&store, 10, 0);
        store.put_job(&test_job("a", 70.0, 3, Some("5"))).unwrap();
        store.put_job(&test_job("b", 30.0, 40, None)).unwrap();

        let balancer = balancer_over(&store);
        let first = balancer.balance().unwrap();
        let second = balancer.balance().unwrap();

        assert_eq!(first.plan, second.plan);
        assert!(second.published.is_empty());
        assert_eq!(second.unchanged.len(), 2);
    }

    #[test]
    fn force_rewrites_unchanged_limits() {
        let store = FarmStore::open_in_memory().unwrap();
        seed(&store, 2, 0);
        store.put_job(&test_job("a", 1.0, 10, None)).unwrap();

        let balancer = balancer_over(&store);
        balancer.balance().unwrap();
        let summary = balancer
            .balance_with_options(BalanceOptions {
                dry_run: false,
                force: true,
            })
            .unwrap();

        assert_eq!(summary.published, vec!["a".to_string()]);
    }

    #[test]
    fn dry_run_writes_nothing() {
        let store = FarmStore::open_in_memory().unwrap();
        seed(&store, 6, 0);
        store.put_job(&test_job("a", 1.0, 10, None)).unwrap();

        let summary = balancer_over(&store)
            .balance_with_options(BalanceOptions {
                dry_run: true,
                force: false,
            })
            .unwrap();

        assert!(summary.dry_run);
        assert_eq!(summary.plan.limit_for("a"), Some(6));
        assert!(summary.published.is_empty());
        assert_eq!(store.get_job("a").unwrap().unwrap().machine_limit, 0);
    }

    #[test]
    fn invalid_job_is_excluded_and_untouched() {
        let store = FarmStore::open_in_memory().unwrap();
        seed(&store, 10, 0);
        store.put_job(&test_job("good", 50.0, 50, None)).unwrap();
        let mut bad = test_job("bad", 50.0, 50, Some("lots"));
        bad.machine_limit = 2;
        store.put_job(&bad).unwrap();

        let summary = balancer_over(&store).balance().unwrap();

        assert_eq!(summary.plan.rejected.len(), 1);
        assert_eq!(summary.plan.rejected[0].id, "bad");
        // The bad job's priority does not dilute the good one.
        assert_eq!(store.get_job("good").unwrap().unwrap().machine_limit, 10);
        assert_eq!(store.get_job("bad").unwrap().unwrap().machine_limit, 2);
    }

    #[test]
    fn empty_farm_is_a_no_op() {
        let store = FarmStore::open_in_memory().unwrap();
        seed(&store, 5, 0);

        let summary = balancer_over(&store).balance().unwrap();
        assert!(summary.plan.is_empty());
        assert!(summary.published.is_empty());
    }

    #[test]
    fn all_zero_priorities_abort_when_configured() {
        let store = FarmStore::open_in_memory().unwrap();
        seed(&store, 4, 0);
        store.put_job(&test_job("a", 0.0, 10, None)).unwrap();

        let settings = BalancerSettings {
            zero_priority: ZeroPriorityPolicy::Abort,
            ..BalancerSettings::default()
        };
        let balancer = Balancer::new(Arc::new(StoreRepository::new(store.clone())), settings);

        let err = balancer.balance().unwrap_err();
        assert!(matches!(err, BalanceError::Allocation(_)));
        assert_eq!(store.get_job("a").unwrap().unwrap().machine_limit, 0);
    }

    #[test]
    fn write_is_retried_until_it_succeeds() {
        let store = FarmStore::open_in_memory().unwrap();
        seed(&store, 4, 0);
        store.put_job(&test_job("a", 1.0, 10, None)).unwrap();
        let repo = flaky(&store, "a", 2);

        let summary = Balancer::new(repo.clone(), BalancerSettings::default())
            .balance()
            .unwrap();

        assert_eq!(summary.published, vec!["a".to_string()]);
        assert_eq!(repo.attempts.lock().unwrap().len(), 3);
        assert_eq!(store.get_job("a").unwrap().unwrap().machine_limit, 4);
    }

    #[test]
    fn exhausted_retries_do_not_block_other_jobs() {
        let store = FarmStore::open_in_memory().unwrap();
        seed(&store, 4, 0);
        store.put_job(&test_job("a", 1.0, 10, None)).unwrap();
        store.put_job(&test_job("b", 1.0, 10, None)).unwrap();
        let repo = flaky(&store, "a", 10);

        let summary = Balancer::new(repo.clone(), BalancerSettings::default())
            .balance()
            .unwrap();

        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].job, "a");
        assert!(summary.failed[0].error.contains("3 attempts"));
        assert_eq!(summary.published, vec!["b".to_string()]);
        assert_eq!(store.get_job("b").unwrap().unwrap().machine_limit, 2);

        let attempts = repo.attempts.lock().unwrap();
        assert_eq!(attempts.iter().filter(|j| *j == "a").count(), 3);
    }

    #[test]
    fn failed_license_lookup_excludes_only_that_job() {
        let store = FarmStore::open_in_memory().unwrap();
        seed(&store, 6, 0);
        store.put_job(&test_job("broken-lookup", 1.0, 10, None)).unwrap();
        store.put_job(&test_job("ok", 1.0, 10, None)).unwrap();

        let summary = Balancer::new(flaky(&store, "none", 0), BalancerSettings::default())
            .balance()
            .unwrap();

        assert_eq!(summary.plan.limit_for("ok"), Some(6));
        assert_eq!(summary.plan.rejected[0].id, "broken-lookup");
    }

    #[test]
    fn submitted_job_gets_license_cap_before_balancing() {
        let store = FarmStore::open_in_memory().unwrap();
        seed(&store, 10, 0);
        store.put_job(&test_job("new", 100.0, 50, Some("3"))).unwrap();
        let repo = flaky(&store, "none", 0);

        let summary = Balancer::new(repo.clone(), BalancerSettings::default())
            .handle(&FarmEvent::JobSubmitted("new".to_string()))
            .unwrap();

        assert_eq!(summary.plan.limit_for("new"), Some(3));
        // One write for the submit cap; the balance run then finds it unchanged.
        assert_eq!(repo.attempts.lock().unwrap().len(), 1);
        assert_eq!(summary.unchanged, vec!["new".to_string()]);
    }

    #[test]
    fn submit_of_unknown_job_still_balances() {
        let store = FarmStore::open_in_memory().unwrap();
        seed(&store, 3, 0);
        store.put_job(&test_job("a", 1.0, 10, None)).unwrap();

        let summary = balancer_over(&store).on_job_submitted("ghost").unwrap();
        assert_eq!(summary.plan.limit_for("a"), Some(3));
    }

    #[test]
    fn summary_serializes_to_json() {
        let store = FarmStore::open_in_memory().unwrap();
        seed(&store, 2, 0);
        store.put_job(&test_job("a", 1.0, 10, None)).unwrap();

        let summary = balancer_over(&store).balance().unwrap();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["published"][0], "a");
        assert_eq!(json["plan"]["allocations"][0]["limit"], 2);
    }
}
