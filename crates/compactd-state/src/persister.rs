//! Persistence interfaces consumed by the scheduler.
//!
//! A [`JobPersistenceManager`] hands out one [`JobPersister`] per tenant.
//! Every tracker mutation is written through its tenant's persister before
//! it becomes visible in memory, so the persister's atomicity is what keeps
//! durable and in-memory state in step.

use std::sync::Arc;

use crate::error::StateResult;
use crate::types::{TenantId, TrackedCompactionJob, TrackedJob, TrackedPlanJob};

/// Durable job list of a single tenant.
pub trait JobPersister: Send + Sync {
    /// Write `to_write` and delete `to_delete` as one atomic unit.
    ///
    /// Either every listed write and delete lands, or the call fails and
    /// none of them may be assumed to have landed.
    fn write_and_delete_jobs(&self, to_write: &[TrackedJob], to_delete: &[TrackedJob]) -> StateResult<()>;
}

/// Creates, deletes and recovers per-tenant persisters.
pub trait JobPersistenceManager: Send + Sync {
    /// Prepare durable storage for a tenant and return its persister.
    fn initialize_tenant(&self, tenant: &str) -> StateResult<Arc<dyn JobPersister>>;

    /// Delete everything stored for a tenant.
    fn delete_tenant(&self, tenant: &str) -> StateResult<()>;

    /// Load every initialized tenant together with its persisted jobs.
    fn recover_tenants(&self) -> StateResult<Vec<RecoveredTenant>>;
}

/// A tenant's persisted state as loaded at startup.
pub struct RecoveredTenant {
    pub tenant: TenantId,
    pub persister: Arc<dyn JobPersister>,
    pub compaction_jobs: Vec<TrackedCompactionJob>,
    pub plan_job: Option<TrackedPlanJob>,
}

impl RecoveredTenant {
    /// Split a flat job list into compaction jobs and the optional plan job.
    pub fn from_jobs(tenant: TenantId, persister: Arc<dyn JobPersister>, jobs: Vec<TrackedJob>) -> Self {
        let mut compaction_jobs = Vec::new();
        let mut plan_job = None;
        for job in jobs {
            match job {
                TrackedJob::Plan(plan) => plan_job = Some(plan),
                TrackedJob::Compaction(compaction) => compaction_jobs.push(compaction),
            }
        }
        Self {
            tenant,
            persister,
            compaction_jobs,
            plan_job,
        }
    }
}

/// A persister that accepts every write and stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopJobPersister;

impl JobPersister for NopJobPersister {
    fn write_and_delete_jobs(&self, _to_write: &[TrackedJob], _to_delete: &[TrackedJob]) -> StateResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CompactionJobSpec;
    use std::time::UNIX_EPOCH;

    #[test]
    fn from_jobs_splits_plan_and_compaction() {
        let jobs = vec![
            TrackedJob::from(TrackedCompactionJob::new("a", CompactionJobSpec::default(), 1, UNIX_EPOCH)),
            TrackedJob::from(TrackedPlanJob::new(UNIX_EPOCH)),
            TrackedJob::from(TrackedCompactionJob::new("b", CompactionJobSpec::default(), 2, UNIX_EPOCH)),
        ];
        let recovered = RecoveredTenant::from_jobs("t1".into(), Arc::new(NopJobPersister), jobs);

        assert_eq!(recovered.tenant, "t1");
        assert!(recovered.plan_job.is_some());
        let ids: Vec<_> = recovered.compaction_jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn nop_persister_accepts_everything() {
        let job = TrackedJob::from(TrackedPlanJob::new(UNIX_EPOCH));
        assert!(NopJobPersister.write_and_delete_jobs(&[job.clone()], &[job]).is_ok());
    }
}
