//! Startup recovery of persisted tenants.

use std::collections::HashMap;
use std::sync::Arc;

use compactd_state::{JobPersistenceManager, TenantId};
use tracing::info;

use crate::clock::Clock;
use crate::error::SchedulerResult;
use crate::job_tracker::JobTracker;
use crate::metrics::SchedulerMetrics;
use crate::rotator::Rotator;

/// Rebuild a tracker for every tenant the persistence manager knows and
/// register each one with the rotator.
///
/// The returned map is what [`TenantDiscoverer::recover_from`] expects.
///
/// [`TenantDiscoverer::recover_from`]: crate::TenantDiscoverer::recover_from
pub fn recover_trackers(
    persistence: &dyn JobPersistenceManager,
    rotator: &Rotator,
    clock: Arc<dyn Clock>,
    max_leases: usize,
    metrics: &SchedulerMetrics,
) -> SchedulerResult<HashMap<TenantId, Arc<JobTracker>>> {
    let mut trackers = HashMap::new();
    for recovered in persistence.recover_tenants()? {
        let tracker = JobTracker::new(
            recovered.persister,
            recovered.tenant.clone(),
            Arc::clone(&clock),
            max_leases,
            metrics.tracker_metrics(&recovered.tenant),
        )
        .with_work_signal(rotator.work_signal());
        tracker.recover_from(recovered.compaction_jobs, recovered.plan_job);
        let tracker = Arc::new(tracker);
        rotator.add_tenant(recovered.tenant.clone(), Arc::clone(&tracker));
        trackers.insert(recovered.tenant, tracker);
    }
    info!(tenants = trackers.len(), "recovered persisted tenants");
    Ok(trackers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use compactd_state::{
        CompactionJobSpec, JobStatus, JobStore, TrackedCompactionJob, TrackedJob, TrackedPlanJob,
    };
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn rebuilds_trackers_from_store() {
        let t0 = UNIX_EPOCH + Duration::from_secs(1_767_312_000);
        let store = JobStore::open_in_memory().unwrap();
        let persister = store.initialize_tenant("a").unwrap();
        store.initialize_tenant("empty").unwrap();

        let mut leased = TrackedJob::from(TrackedCompactionJob::new("j2", CompactionJobSpec::default(), 2, t0));
        leased.mark_leased(t0);
        let mut plan = TrackedJob::from(TrackedPlanJob::new(t0));
        plan.mark_complete(t0);
        persister
            .write_and_delete_jobs(
                &[
                    TrackedJob::from(TrackedCompactionJob::new("j1", CompactionJobSpec::default(), 1, t0)),
                    leased,
                    plan,
                ],
                &[],
            )
            .unwrap();

        let rotator = Rotator::new();
        let metrics = SchedulerMetrics::new();
        let trackers =
            recover_trackers(&store, &rotator, Arc::new(ManualClock::new(t0)), 0, &metrics).unwrap();

        assert_eq!(rotator.tenants(), ["a", "empty"]);
        assert_eq!(trackers.len(), 2);

        let snap = trackers["a"].snapshot();
        assert_eq!(snap.pending, ["j1"]);
        assert_eq!(snap.active, ["j2"]);
        assert_eq!(snap.complete_plan_time, Some(t0));
        assert_eq!(metrics.snapshot()[0].active_jobs, 1);
        let persisted = store.list_jobs("a").unwrap();
        let j2 = persisted.iter().find(|job| job.id() == "j2").unwrap();
        assert_eq!(j2.status(), JobStatus::Leased);
    }
}
