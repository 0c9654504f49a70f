//! The tenant → tracker registry.
//!
//! The registry lock only guards the map itself. Lease and maintenance
//! fan-out take a snapshot of the registered trackers and call them with the
//! lock released, so a slow persister in one tenant never blocks add/remove
//! or lookups for the others.
//!
//! Trackers built with [`Rotator::work_signal`] wake [`Rotator::wait_for_work`]
//! callers on every path that refills their pending queue, not only during
//! maintenance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use compactd_state::{TenantId, TrackedJob};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::job_tracker::{JobTracker, MaintenanceParams};

/// Aggregate result of one maintenance pass over every tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceSummary {
    pub tenants: usize,
    /// Trackers whose pending queue went from empty to non-empty.
    pub transitioned: usize,
    pub failed: usize,
}

/// Concurrency-safe registry of per-tenant job trackers.
#[derive(Default)]
pub struct Rotator {
    trackers: RwLock<HashMap<TenantId, Arc<JobTracker>>>,
    cursor: AtomicUsize,
    work_available: Arc<Notify>,
}

impl Rotator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The signal trackers should notify when they have new work. Pass it to
    /// [`JobTracker::with_work_signal`].
    pub fn work_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.work_available)
    }

    /// Register a tracker, replacing any previous one for the tenant.
    pub fn add_tenant(&self, tenant: impl Into<TenantId>, tracker: Arc<JobTracker>) {
        let tenant = tenant.into();
        debug!(tenant = %tenant, "tracker registered");
        self.trackers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tenant, tracker);
    }

    /// Unregister a tenant, returning its tracker if it was registered.
    pub fn remove_tenant(&self, tenant: &str) -> Option<Arc<JobTracker>> {
        self.trackers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tenant)
    }

    pub fn tracker(&self, tenant: &str) -> Option<Arc<JobTracker>> {
        self.trackers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tenant)
            .cloned()
    }

    /// Registered tenant ids, sorted.
    pub fn tenants(&self) -> Vec<TenantId> {
        self.snapshot().into_iter().map(|(tenant, _)| tenant).collect()
    }

    pub fn len(&self) -> usize {
        self.trackers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lease one job from the next tenant in rotation that has work.
    ///
    /// Each call starts one tenant further along than the previous call.
    /// A tenant whose lease fails to persist is logged and skipped.
    pub fn lease_job(&self) -> Option<(TenantId, TrackedJob)> {
        let trackers = self.snapshot();
        if trackers.is_empty() {
            return None;
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % trackers.len();
        for i in 0..trackers.len() {
            let (tenant, tracker) = &trackers[(start + i) % trackers.len()];
            match tracker.lease() {
                Ok(Some(job)) => return Some((tenant.clone(), job)),
                Ok(None) => {}
                Err(e) => warn!(tenant = %tenant, error = %e, "failed to lease job"),
            }
        }
        None
    }

    /// Run maintenance on every registered tracker.
    ///
    /// Waiters in [`Rotator::wait_for_work`] are woken when any tracker's
    /// pending queue went from empty to non-empty.
    pub fn run_maintenance(&self, params: &MaintenanceParams, force_plan: bool) -> MaintenanceSummary {
        let trackers = self.snapshot();
        let mut summary = MaintenanceSummary {
            tenants: trackers.len(),
            ..MaintenanceSummary::default()
        };
        for (tenant, tracker) in &trackers {
            match tracker.maintenance(
                params.lease_duration,
                force_plan,
                params.planning_interval,
                params.compaction_wait_period,
            ) {
                Ok(true) => summary.transitioned += 1,
                Ok(false) => {}
                Err(e) => {
                    summary.failed += 1;
                    warn!(tenant = %tenant, error = %e, "tracker maintenance failed");
                }
            }
        }
        if summary.transitioned > 0 {
            self.work_available.notify_waiters();
        }
        summary
    }

    /// Resolves once some registered tracker has pending work.
    ///
    /// Returns immediately if work is already pending, so a caller that saw
    /// [`Rotator::lease_job`] return `None` cannot miss a refill that raced
    /// with it.
    pub async fn wait_for_work(&self) {
        let notified = self.work_available.notified();
        tokio::pin!(notified);
        // Register before checking so a notification in between is kept.
        notified.as_mut().enable();
        if self.has_pending_work() {
            return;
        }
        notified.await;
    }

    /// Whether any registered tracker has a pending job.
    pub fn has_pending_work(&self) -> bool {
        self.snapshot().iter().any(|(_, tracker)| tracker.has_pending())
    }

    fn snapshot(&self) -> Vec<(TenantId, Arc<JobTracker>)> {
        let trackers = self.trackers.read().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot: Vec<_> = trackers
            .iter()
            .map(|(tenant, tracker)| (tenant.clone(), Arc::clone(tracker)))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::metrics::TrackerMetrics;
    use compactd_state::{
        CompactionJobSpec, JobPersister, NopJobPersister, StateError, StateResult, TrackedCompactionJob,
    };
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    struct FailingPersister;

    impl JobPersister for FailingPersister {
        fn write_and_delete_jobs(&self, _: &[TrackedJob], _: &[TrackedJob]) -> StateResult<()> {
            Err(StateError::Write("unavailable".into()))
        }
    }

    fn now() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_767_312_000)
    }

    fn tracker_with(persister: Arc<dyn JobPersister>, tenant: &str, jobs: &[&str]) -> Arc<JobTracker> {
        let tracker = JobTracker::new(
            persister,
            tenant,
            Arc::new(ManualClock::new(now())),
            0,
            Arc::new(TrackerMetrics::new()),
        );
        let jobs = jobs
            .iter()
            .enumerate()
            .map(|(i, id)| TrackedCompactionJob::new(*id, CompactionJobSpec::default(), i as u32 + 1, now()))
            .collect();
        tracker.recover_from(jobs, None);
        Arc::new(tracker)
    }

    fn tracker(tenant: &str, jobs: &[&str]) -> Arc<JobTracker> {
        tracker_with(Arc::new(NopJobPersister), tenant, jobs)
    }

    fn signalled_tracker(rotator: &Rotator, tenant: &str) -> Arc<JobTracker> {
        Arc::new(
            JobTracker::new(
                Arc::new(NopJobPersister),
                tenant,
                Arc::new(ManualClock::new(now())),
                0,
                Arc::new(TrackerMetrics::new()),
            )
            .with_work_signal(rotator.work_signal()),
        )
    }

    #[test]
    fn add_lookup_remove() {
        let rotator = Rotator::new();
        rotator.add_tenant("b", tracker("b", &[]));
        rotator.add_tenant("a", tracker("a", &[]));

        assert_eq!(rotator.tenants(), ["a", "b"]);
        assert_eq!(rotator.len(), 2);
        assert!(rotator.tracker("a").is_some());

        let removed = rotator.remove_tenant("a").unwrap();
        assert_eq!(removed.tenant(), "a");
        assert!(rotator.remove_tenant("a").is_none());
        assert!(rotator.tracker("a").is_none());
        assert_eq!(rotator.len(), 1);
    }

    #[test]
    fn add_replaces_existing_tracker() {
        let rotator = Rotator::new();
        let first = tracker("a", &[]);
        let second = tracker("a", &["x"]);
        rotator.add_tenant("a", first);
        rotator.add_tenant("a", second.clone());

        assert_eq!(rotator.len(), 1);
        assert!(Arc::ptr_eq(&rotator.tracker("a").unwrap(), &second));
    }

    #[test]
    fn lease_rotates_across_tenants() {
        let rotator = Rotator::new();
        rotator.add_tenant("a", tracker("a", &["a1", "a2"]));
        rotator.add_tenant("b", tracker("b", &["b1", "b2"]));

        let leased: Vec<_> = std::iter::from_fn(|| rotator.lease_job())
            .map(|(tenant, job)| format!("{tenant}:{}", job.id()))
            .collect();

        assert_eq!(leased, ["a:a1", "b:b1", "a:a2", "b:b2"]);
    }

    #[test]
    fn lease_skips_empty_and_failing_tenants() {
        let rotator = Rotator::new();
        rotator.add_tenant("a", tracker_with(Arc::new(FailingPersister), "a", &["a1"]));
        rotator.add_tenant("b", tracker("b", &[]));
        rotator.add_tenant("c", tracker("c", &["c1"]));

        let (tenant, job) = rotator.lease_job().unwrap();
        assert_eq!((tenant.as_str(), job.id()), ("c", "c1"));
        assert!(rotator.lease_job().is_none());
        assert_eq!(rotator.tracker("a").unwrap().snapshot().pending, ["a1"]);
    }

    #[test]
    fn lease_on_empty_rotator() {
        assert!(Rotator::new().lease_job().is_none());
    }

    #[test]
    fn maintenance_counts_transitions_and_failures() {
        let rotator = Rotator::new();
        rotator.add_tenant("a", tracker("a", &[]));
        rotator.add_tenant("b", tracker("b", &["b1"]));
        rotator.add_tenant("c", tracker_with(Arc::new(FailingPersister), "c", &[]));

        let summary = rotator.run_maintenance(&MaintenanceParams::default(), false);

        assert_eq!(
            summary,
            MaintenanceSummary {
                tenants: 3,
                transitioned: 1,
                failed: 1,
            }
        );
        assert_eq!(
            rotator.tracker("b").unwrap().snapshot().pending,
            ["b1", compactd_state::PLAN_JOB_ID]
        );
    }

    #[tokio::test]
    async fn transition_wakes_waiters() {
        let rotator = Arc::new(Rotator::new());
        rotator.add_tenant("a", tracker("a", &[]));

        let waiter = {
            let rotator = Arc::clone(&rotator);
            tokio::spawn(async move { rotator.wait_for_work().await })
        };
        tokio::task::yield_now().await;

        rotator.run_maintenance(&MaintenanceParams::default(), false);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woken")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_after_transition_returns_immediately() {
        let rotator = Rotator::new();
        rotator.add_tenant("a", tracker("a", &[]));

        let summary = rotator.run_maintenance(&MaintenanceParams::default(), false);
        assert_eq!(summary.transitioned, 1);

        tokio::time::timeout(Duration::from_millis(200), rotator.wait_for_work())
            .await
            .expect("pending work is visible to a late waiter");
        assert!(rotator.has_pending_work());
    }

    #[tokio::test]
    async fn plan_completion_wakes_waiters() {
        let rotator = Arc::new(Rotator::new());
        let tracker = signalled_tracker(&rotator, "a");
        rotator.add_tenant("a", Arc::clone(&tracker));
        rotator.run_maintenance(&MaintenanceParams::default(), false);
        let (_, plan) = rotator.lease_job().unwrap();
        assert!(!rotator.has_pending_work());

        let waiter = {
            let rotator = Arc::clone(&rotator);
            tokio::spawn(async move { rotator.wait_for_work().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        let outcome = tracker
            .complete_plan_job(
                plan.epoch(),
                vec![crate::job_tracker::PlannedJob::new("x", CompactionJobSpec::default())],
            )
            .unwrap()
            .unwrap();
        assert!(outcome.transitioned);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woken by plan output")
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_lease_wakes_waiters() {
        let rotator = Arc::new(Rotator::new());
        let tracker = signalled_tracker(&rotator, "a");
        tracker.recover_from(
            vec![TrackedCompactionJob::new("j", CompactionJobSpec::default(), 1, now())],
            None,
        );
        rotator.add_tenant("a", Arc::clone(&tracker));
        let (_, job) = rotator.lease_job().unwrap();

        let waiter = {
            let rotator = Arc::clone(&rotator);
            tokio::spawn(async move { rotator.wait_for_work().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        assert!(tracker.cancel_lease(job.id(), job.epoch()).unwrap());

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woken by cancelled lease")
            .unwrap();
    }
}
