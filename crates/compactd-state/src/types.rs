//! Domain types for the compactd job store.
//!
//! A tenant's durable state is a flat list of [`TrackedJob`]s: at most one
//! plan job plus any number of compaction jobs. Each job carries enough
//! status information (status, status time, lease epoch) to rebuild the
//! scheduler's pending/active/complete classification after a restart.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Unique identifier for a tenant.
pub type TenantId = String;

/// Unique identifier for a job within a tenant.
pub type JobId = String;

/// Reserved id of a tenant's singleton plan job.
///
/// Compaction job ids are produced by planning and never take this value.
pub const PLAN_JOB_ID: &str = "__plan__";

/// Lifecycle status of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be leased.
    Available,
    /// Leased to a worker.
    Leased,
    /// Finished.
    Complete,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Available => write!(f, "available"),
            JobStatus::Leased => write!(f, "leased"),
            JobStatus::Complete => write!(f, "complete"),
        }
    }
}

/// Status bookkeeping shared by every job variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub status: JobStatus,
    /// Instant of the last state transition (lease grant, renewal,
    /// expiry, completion).
    pub status_time: SystemTime,
    /// Incremented on every lease grant. Workers must present the epoch of
    /// their lease when renewing, cancelling or completing.
    pub epoch: u64,
    pub created_at: SystemTime,
}

impl JobState {
    fn new(created_at: SystemTime) -> Self {
        Self {
            status: JobStatus::Available,
            status_time: created_at,
            epoch: 0,
            created_at,
        }
    }
}

/// The opaque work description of a compaction job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionJobSpec {
    /// Blocks to compact together.
    pub block_ids: Vec<String>,
    /// Whether the output should be split into shards.
    pub split: bool,
}

/// The singleton "compute the next compaction plan" job of a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedPlanJob {
    pub state: JobState,
}

impl TrackedPlanJob {
    pub fn new(created_at: SystemTime) -> Self {
        Self {
            state: JobState::new(created_at),
        }
    }
}

/// A unit of compaction work produced by a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedCompactionJob {
    pub id: JobId,
    pub spec: CompactionJobSpec,
    /// Position within the planning generation that produced this job.
    pub order: u32,
    pub state: JobState,
}

impl TrackedCompactionJob {
    pub fn new(id: impl Into<JobId>, spec: CompactionJobSpec, order: u32, created_at: SystemTime) -> Self {
        Self {
            id: id.into(),
            spec,
            order,
            state: JobState::new(created_at),
        }
    }
}

/// A job tracked by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackedJob {
    Plan(TrackedPlanJob),
    Compaction(TrackedCompactionJob),
}

impl TrackedJob {
    pub fn id(&self) -> &str {
        match self {
            TrackedJob::Plan(_) => PLAN_JOB_ID,
            TrackedJob::Compaction(job) => &job.id,
        }
    }

    pub fn is_plan(&self) -> bool {
        matches!(self, TrackedJob::Plan(_))
    }

    /// Planning order, `None` for the plan job.
    pub fn order(&self) -> Option<u32> {
        match self {
            TrackedJob::Plan(_) => None,
            TrackedJob::Compaction(job) => Some(job.order),
        }
    }

    pub fn state(&self) -> &JobState {
        match self {
            TrackedJob::Plan(job) => &job.state,
            TrackedJob::Compaction(job) => &job.state,
        }
    }

    fn state_mut(&mut self) -> &mut JobState {
        match self {
            TrackedJob::Plan(job) => &mut job.state,
            TrackedJob::Compaction(job) => &mut job.state,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.state().status
    }

    pub fn status_time(&self) -> SystemTime {
        self.state().status_time
    }

    pub fn epoch(&self) -> u64 {
        self.state().epoch
    }

    /// Grant a new lease: bumps the epoch and stamps the grant instant.
    pub fn mark_leased(&mut self, now: SystemTime) {
        let state = self.state_mut();
        state.status = JobStatus::Leased;
        state.status_time = now;
        state.epoch += 1;
    }

    /// Refresh the lease of a leased job without changing its epoch.
    pub fn renew(&mut self, now: SystemTime) {
        self.state_mut().status_time = now;
    }

    /// Return the job to the pool of leasable work.
    pub fn mark_available(&mut self, now: SystemTime) {
        let state = self.state_mut();
        state.status = JobStatus::Available;
        state.status_time = now;
    }

    pub fn mark_complete(&mut self, now: SystemTime) {
        let state = self.state_mut();
        state.status = JobStatus::Complete;
        state.status_time = now;
    }
}

impl From<TrackedPlanJob> for TrackedJob {
    fn from(job: TrackedPlanJob) -> Self {
        TrackedJob::Plan(job)
    }
}

impl From<TrackedCompactionJob> for TrackedJob {
    fn from(job: TrackedCompactionJob) -> Self {
        TrackedJob::Compaction(job)
    }
}

/// Record stored for every initialized tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub tenant: TenantId,
    pub initialized_at: SystemTime,
}

/// Validate a tenant id for use as a key-space prefix.
pub fn is_valid_tenant_id(tenant: &str) -> bool {
    !tenant.is_empty() && !tenant.contains('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn plan_job_uses_reserved_id() {
        let job = TrackedJob::from(TrackedPlanJob::new(at(10)));
        assert_eq!(job.id(), PLAN_JOB_ID);
        assert!(job.is_plan());
        assert_eq!(job.order(), None);
        assert_eq!(job.status(), JobStatus::Available);
    }

    #[test]
    fn lease_bumps_epoch_and_renew_keeps_it() {
        let mut job = TrackedJob::from(TrackedCompactionJob::new(
            "a",
            CompactionJobSpec::default(),
            3,
            at(10),
        ));
        job.mark_leased(at(20));
        assert_eq!(job.status(), JobStatus::Leased);
        assert_eq!(job.epoch(), 1);
        assert_eq!(job.status_time(), at(20));

        job.renew(at(30));
        assert_eq!(job.epoch(), 1);
        assert_eq!(job.status_time(), at(30));

        job.mark_available(at(40));
        job.mark_leased(at(50));
        assert_eq!(job.epoch(), 2);
    }

    #[test]
    fn complete_records_completion_time() {
        let mut job = TrackedJob::from(TrackedPlanJob::new(at(1)));
        job.mark_complete(at(99));
        assert_eq!(job.status(), JobStatus::Complete);
        assert_eq!(job.status_time(), at(99));
        assert_eq!(job.state().created_at, at(1));
    }

    #[test]
    fn json_is_tagged_by_kind() {
        let job = TrackedJob::from(TrackedCompactionJob::new(
            "blk",
            CompactionJobSpec {
                block_ids: vec!["01A".into(), "01B".into()],
                split: true,
            },
            1,
            at(5),
        ));
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["kind"], "compaction");
        assert_eq!(value["id"], "blk");
        assert_eq!(value["state"]["status"], "available");
    }

    #[test]
    fn tenant_id_validation() {
        assert!(is_valid_tenant_id("tenant-1"));
        assert!(!is_valid_tenant_id(""));
        assert!(!is_valid_tenant_id("a/b"));
    }
}
