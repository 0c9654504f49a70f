//! Per-tenant job tracker.
//!
//! A [`JobTracker`] owns one tenant's scheduling state: the pending queue,
//! the active (leased) queue, the retained complete compaction jobs and the
//! planning cadence. Every mutation is first computed on clones, written
//! through the tenant's [`JobPersister`], and only applied to memory once the
//! write succeeded. A failed write leaves the tracker exactly as it was.
//!
//! Whenever pending goes from empty to non-empty the tracker notifies its
//! work signal, which the [`Rotator`](crate::Rotator) shares with every
//! tracker it schedules.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use compactd_state::{
    CompactionJobSpec, JobId, JobPersister, JobStatus, PLAN_JOB_ID, TenantId, TrackedCompactionJob,
    TrackedJob, TrackedPlanJob,
};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::SchedulerResult;
use crate::job_list::{JobQueues, Queue, Slot};
use crate::metrics::TrackerMetrics;

/// Timing policy applied by [`JobTracker::maintenance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceParams {
    /// Leases older than this are reverted to pending.
    pub lease_duration: Duration,
    /// Planning happens at most once per interval.
    pub planning_interval: Duration,
    /// Delay after an interval boundary before the next plan.
    pub compaction_wait_period: Duration,
}

impl Default for MaintenanceParams {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(10 * 60),
            planning_interval: Duration::from_secs(60 * 60),
            compaction_wait_period: Duration::from_secs(15 * 60),
        }
    }
}

/// A compaction job produced by a completed plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedJob {
    pub id: JobId,
    pub spec: CompactionJobSpec,
}

impl PlannedJob {
    pub fn new(id: impl Into<JobId>, spec: CompactionJobSpec) -> Self {
        Self { id: id.into(), spec }
    }
}

/// Result of completing a plan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOutcome {
    /// Compaction jobs added to pending.
    pub accepted: usize,
    /// Planned ids ignored because they were already tracked.
    pub skipped: usize,
    /// Complete compaction jobs dropped because the new plan no longer lists them.
    pub pruned: usize,
    /// Pending went from empty to non-empty.
    pub transitioned: bool,
}

/// Read-only view of a tracker's queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSnapshot {
    pub pending: Vec<JobId>,
    pub active: Vec<JobId>,
    /// Sorted.
    pub complete: Vec<JobId>,
    pub plan_job_leased: bool,
    pub complete_plan_time: Option<SystemTime>,
}

struct TrackerState {
    queues: JobQueues<TrackedJob>,
    incomplete: HashMap<JobId, Slot>,
    complete_compaction_jobs: HashMap<JobId, TrackedCompactionJob>,
    is_plan_job_leased: bool,
    complete_plan_time: Option<SystemTime>,
    /// Set once the tenant is being deleted; no further writes are made.
    retired: bool,
}

impl TrackerState {
    fn new() -> Self {
        Self {
            queues: JobQueues::new(),
            incomplete: HashMap::new(),
            complete_compaction_jobs: HashMap::new(),
            is_plan_job_leased: false,
            complete_plan_time: None,
            retired: false,
        }
    }

    /// Where a job re-entering pending goes: compaction jobs after the last
    /// compaction job with an order not greater than theirs, ahead of a
    /// pending plan job. The plan job always goes to the back.
    fn pending_position(&self, job: &TrackedJob) -> Option<Slot> {
        let order = job.order()?;
        let mut cursor = self.queues.back(Queue::Pending);
        while let Some(slot) = cursor {
            if let Some(existing) = self.queues.get(slot).and_then(TrackedJob::order) {
                if existing <= order {
                    return self.queues.next(slot);
                }
            }
            cursor = self.queues.prev(slot);
        }
        self.queues.front(Queue::Pending)
    }

    /// Where a job with the given lease time goes in active, keeping it
    /// sorted by status time.
    fn active_position(&self, status_time: SystemTime) -> Option<Slot> {
        let mut cursor = self.queues.back(Queue::Active);
        while let Some(slot) = cursor {
            if self
                .queues
                .get(slot)
                .is_some_and(|job| job.status_time() <= status_time)
            {
                return self.queues.next(slot);
            }
            cursor = self.queues.prev(slot);
        }
        self.queues.front(Queue::Active)
    }

    fn position(&self, queue: Queue, job: &TrackedJob) -> Option<Slot> {
        match queue {
            Queue::Pending => self.pending_position(job),
            Queue::Active => self.active_position(job.status_time()),
        }
    }

    /// Insert an incomplete job into `queue` at its ordered position.
    fn place(&mut self, queue: Queue, job: TrackedJob) {
        let before = self.position(queue, &job);
        if job.is_plan() {
            self.is_plan_job_leased = queue == Queue::Active;
        }
        let id = job.id().to_string();
        let slot = self.queues.insert_before(queue, before, job);
        self.incomplete.insert(id, slot);
    }

    /// Store the updated version of the job at `slot` and move it to its
    /// ordered position in `queue`. The slot stays the same.
    fn replace(&mut self, slot: Slot, queue: Queue, job: TrackedJob) {
        let before = self.position(queue, &job);
        if job.is_plan() {
            self.is_plan_job_leased = queue == Queue::Active;
        }
        if let Some(item) = self.queues.get_mut(slot) {
            *item = job;
        }
        self.queues.move_before(slot, queue, before);
    }

    /// Drop an incomplete job from tracking.
    fn forget(&mut self, slot: Slot) -> Option<TrackedJob> {
        let job = self.queues.remove(slot)?;
        self.incomplete.remove(job.id());
        if job.is_plan() {
            self.is_plan_job_leased = false;
        }
        Some(job)
    }

    /// The active job `id`, if its lease epoch is `epoch`.
    fn active_job(&self, id: &str, epoch: u64) -> Option<(Slot, &TrackedJob)> {
        let slot = *self.incomplete.get(id)?;
        if self.queues.queue_of(slot) != Some(Queue::Active) {
            return None;
        }
        let job = self.queues.get(slot)?;
        (job.epoch() == epoch).then_some((slot, job))
    }

    /// Expired leases from the front of active, already marked available.
    fn expired_leases(&self, now: SystemTime, lease_duration: Duration) -> Vec<(Slot, TrackedJob)> {
        let mut expired = Vec::new();
        let mut cursor = self.queues.front(Queue::Active);
        while let Some(slot) = cursor {
            let Some(job) = self.queues.get(slot) else {
                break;
            };
            if !lease_expired(job.status_time(), now, lease_duration) {
                break;
            }
            let mut job = job.clone();
            job.mark_available(now);
            expired.push((slot, job));
            cursor = self.queues.next(slot);
        }
        expired
    }

    fn planning_due(&self, now: SystemTime, interval: Duration, wait: Duration) -> bool {
        match self.complete_plan_time {
            None => true,
            Some(completed) => now >= truncate(completed + interval, interval) + wait,
        }
    }

    fn ids(&self, queue: Queue) -> Vec<JobId> {
        self.queues
            .iter(queue)
            .map(|(_, job)| job.id().to_string())
            .collect()
    }
}

fn lease_expired(leased_at: SystemTime, now: SystemTime, lease_duration: Duration) -> bool {
    now.duration_since(leased_at)
        .is_ok_and(|age| age > lease_duration)
}

/// Round `t` down to a multiple of `interval` since the Unix epoch.
fn truncate(t: SystemTime, interval: Duration) -> SystemTime {
    let Ok(since_epoch) = t.duration_since(UNIX_EPOCH) else {
        return t;
    };
    if interval.is_zero() {
        return t;
    }
    let rem = since_epoch.as_nanos() % interval.as_nanos();
    let rem = Duration::new(
        (rem / 1_000_000_000) as u64,
        (rem % 1_000_000_000) as u32,
    );
    t - rem
}

/// Scheduling state of a single tenant.
pub struct JobTracker {
    tenant: TenantId,
    persister: Arc<dyn JobPersister>,
    clock: Arc<dyn Clock>,
    max_leases: usize,
    metrics: Arc<TrackerMetrics>,
    work_available: Arc<Notify>,
    state: Mutex<TrackerState>,
}

impl JobTracker {
    /// Create an empty tracker. `max_leases == 0` means unlimited.
    pub fn new(
        persister: Arc<dyn JobPersister>,
        tenant: impl Into<TenantId>,
        clock: Arc<dyn Clock>,
        max_leases: usize,
        metrics: Arc<TrackerMetrics>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            persister,
            clock,
            max_leases,
            metrics,
            work_available: Arc::new(Notify::new()),
            state: Mutex::new(TrackerState::new()),
        }
    }

    /// Notify `signal` whenever pending goes from empty to non-empty.
    pub fn with_work_signal(mut self, signal: Arc<Notify>) -> Self {
        self.work_available = signal;
        self
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Upper bound on concurrently active jobs, `0` when unbounded. The
    /// tracker stores it for callers; it does not refuse leases itself.
    pub fn max_leases(&self) -> usize {
        self.max_leases
    }

    /// Rebuild every in-memory structure from persisted jobs.
    ///
    /// Input order does not matter: pending is sorted by order, active by
    /// lease time.
    pub fn recover_from(&self, compaction_jobs: Vec<TrackedCompactionJob>, plan_job: Option<TrackedPlanJob>) {
        let mut state = self.lock();
        let retired = state.retired;
        *state = TrackerState::new();
        state.retired = retired;

        let mut available = Vec::new();
        let mut leased = Vec::new();
        for job in compaction_jobs {
            match job.state.status {
                JobStatus::Available => available.push(job),
                JobStatus::Leased => leased.push(TrackedJob::from(job)),
                JobStatus::Complete => {
                    state.complete_compaction_jobs.insert(job.id.clone(), job);
                }
            }
        }
        let mut pending_plan = None;
        if let Some(plan) = plan_job {
            match plan.state.status {
                JobStatus::Available => pending_plan = Some(TrackedJob::from(plan)),
                JobStatus::Leased => leased.push(TrackedJob::from(plan)),
                JobStatus::Complete => state.complete_plan_time = Some(plan.state.status_time),
            }
        }

        available.sort_by_key(|job| job.order);
        for job in available {
            state.place(Queue::Pending, job.into());
        }
        if let Some(plan) = pending_plan {
            state.place(Queue::Pending, plan);
        }
        leased.sort_by_key(TrackedJob::status_time);
        for job in leased {
            state.place(Queue::Active, job);
        }

        debug!(
            tenant = %self.tenant,
            pending = state.queues.len(Queue::Pending),
            active = state.queues.len(Queue::Active),
            complete = state.complete_compaction_jobs.len(),
            "tracker recovered"
        );
        self.publish(&state);
    }

    /// Expire stale leases and create a plan job when one is due.
    ///
    /// Returns `true` when pending went from empty to non-empty.
    pub fn maintenance(
        &self,
        lease_duration: Duration,
        force_plan: bool,
        planning_interval: Duration,
        compaction_wait_period: Duration,
    ) -> SchedulerResult<bool> {
        let mut state = self.lock();
        if state.retired {
            return Ok(false);
        }
        let now = self.clock.now();
        let was_empty = state.queues.is_empty(Queue::Pending);

        let expired = state.expired_leases(now, lease_duration);
        let plan = (!state.incomplete.contains_key(PLAN_JOB_ID)
            && (force_plan || state.planning_due(now, planning_interval, compaction_wait_period)))
        .then(|| TrackedJob::from(TrackedPlanJob::new(now)));

        if expired.is_empty() && plan.is_none() {
            return Ok(false);
        }

        let mut written: Vec<TrackedJob> = expired.iter().map(|(_, job)| job.clone()).collect();
        written.extend(plan.iter().cloned());
        self.persist(&written, &[])?;

        let expired_count = expired.len();
        for (slot, job) in expired {
            debug!(tenant = %self.tenant, job = job.id(), epoch = job.epoch(), "lease expired");
            state.replace(slot, Queue::Pending, job);
        }
        if expired_count > 0 {
            self.metrics.add_leases_expired(expired_count);
        }
        if let Some(plan) = plan {
            state.place(Queue::Pending, plan);
            state.complete_plan_time = None;
            self.metrics.inc_plans_created();
            info!(tenant = %self.tenant, forced = force_plan, "plan job created");
        }

        self.publish(&state);
        Ok(self.signal_if_refilled(was_empty, &state))
    }

    /// Lease the job at the front of pending.
    pub fn lease(&self) -> SchedulerResult<Option<TrackedJob>> {
        let mut state = self.lock();
        if state.retired {
            return Ok(None);
        }
        let now = self.clock.now();
        let Some(slot) = state.queues.front(Queue::Pending) else {
            return Ok(None);
        };
        let Some(mut job) = state.queues.get(slot).cloned() else {
            return Ok(None);
        };
        job.mark_leased(now);
        self.persist(std::slice::from_ref(&job), &[])?;

        state.replace(slot, Queue::Active, job.clone());
        self.metrics.inc_leases_granted();
        debug!(tenant = %self.tenant, job = job.id(), epoch = job.epoch(), "lease granted");
        self.publish(&state);
        Ok(Some(job))
    }

    /// Extend a lease. Returns `false` when `id` is not leased under `epoch`.
    pub fn renew_lease(&self, id: &str, epoch: u64) -> SchedulerResult<bool> {
        let mut state = self.lock();
        if state.retired {
            return Ok(false);
        }
        let now = self.clock.now();
        let Some((slot, job)) = state.active_job(id, epoch) else {
            return Ok(false);
        };
        let mut job = job.clone();
        job.renew(now);
        self.persist(std::slice::from_ref(&job), &[])?;

        state.replace(slot, Queue::Active, job);
        Ok(true)
    }

    /// Give a lease back; the job returns to pending immediately.
    pub fn cancel_lease(&self, id: &str, epoch: u64) -> SchedulerResult<bool> {
        let mut state = self.lock();
        if state.retired {
            return Ok(false);
        }
        let now = self.clock.now();
        let Some((slot, job)) = state.active_job(id, epoch) else {
            return Ok(false);
        };
        let mut job = job.clone();
        job.mark_available(now);
        self.persist(std::slice::from_ref(&job), &[])?;

        let was_empty = state.queues.is_empty(Queue::Pending);
        state.replace(slot, Queue::Pending, job);
        debug!(tenant = %self.tenant, job = id, epoch, "lease cancelled");
        self.publish(&state);
        self.signal_if_refilled(was_empty, &state);
        Ok(true)
    }

    /// Finish a leased job. Completing the plan job offers no new work; use
    /// [`JobTracker::complete_plan_job`] to hand over a plan's output.
    pub fn complete_job(&self, id: &str, epoch: u64) -> SchedulerResult<bool> {
        if id == PLAN_JOB_ID {
            return Ok(self.complete_plan_job(epoch, Vec::new())?.is_some());
        }

        let mut state = self.lock();
        if state.retired {
            return Ok(false);
        }
        let now = self.clock.now();
        let Some((slot, job)) = state.active_job(id, epoch) else {
            return Ok(false);
        };
        let mut job = job.clone();
        job.mark_complete(now);
        self.persist(std::slice::from_ref(&job), &[])?;

        state.forget(slot);
        if let TrackedJob::Compaction(job) = job {
            state.complete_compaction_jobs.insert(job.id.clone(), job);
        }
        self.metrics.inc_jobs_completed();
        debug!(tenant = %self.tenant, job = id, "job completed");
        self.publish(&state);
        Ok(true)
    }

    /// Complete the leased plan job and offer the compaction jobs it produced.
    ///
    /// Each planned job gets its 1-based position as order. Ids that are
    /// already tracked are skipped; complete jobs the plan no longer lists
    /// are deleted. Returns `None` when the plan job is not leased under
    /// `epoch`.
    pub fn complete_plan_job(&self, epoch: u64, planned: Vec<PlannedJob>) -> SchedulerResult<Option<PlanOutcome>> {
        let mut state = self.lock();
        if state.retired {
            return Ok(None);
        }
        let now = self.clock.now();
        let Some((slot, plan)) = state.active_job(PLAN_JOB_ID, epoch) else {
            return Ok(None);
        };
        let mut plan = plan.clone();
        plan.mark_complete(now);
        let was_empty = state.queues.is_empty(Queue::Pending);

        let mut listed = HashSet::new();
        let mut offered = Vec::new();
        let mut skipped = 0;
        for (idx, job) in planned.into_iter().enumerate() {
            let duplicate = !listed.insert(job.id.clone());
            if duplicate
                || job.id == PLAN_JOB_ID
                || state.incomplete.contains_key(&job.id)
                || state.complete_compaction_jobs.contains_key(&job.id)
            {
                skipped += 1;
                continue;
            }
            let order = u32::try_from(idx + 1).unwrap_or(u32::MAX);
            offered.push(TrackedJob::from(TrackedCompactionJob::new(job.id, job.spec, order, now)));
        }
        let pruned: Vec<TrackedJob> = state
            .complete_compaction_jobs
            .values()
            .filter(|job| !listed.contains(&job.id))
            .cloned()
            .map(TrackedJob::from)
            .collect();

        let mut written = Vec::with_capacity(offered.len() + 1);
        written.push(plan);
        written.extend(offered.iter().cloned());
        self.persist(&written, &pruned)?;

        state.forget(slot);
        state.complete_plan_time = Some(now);
        let accepted = offered.len();
        for job in offered {
            state.place(Queue::Pending, job);
        }
        for job in &pruned {
            state.complete_compaction_jobs.remove(job.id());
        }

        let outcome = PlanOutcome {
            accepted,
            skipped,
            pruned: pruned.len(),
            transitioned: self.signal_if_refilled(was_empty, &state),
        };
        self.metrics.inc_jobs_completed();
        info!(
            tenant = %self.tenant,
            accepted = outcome.accepted,
            skipped = outcome.skipped,
            pruned = outcome.pruned,
            "plan job completed"
        );
        self.publish(&state);
        Ok(Some(outcome))
    }

    /// Stop persisting anything for this tenant.
    ///
    /// Waits for an in-flight operation to finish; every later call is a
    /// no-op. Used before the tenant's storage is deleted.
    pub fn retire(&self) {
        self.lock().retired = true;
    }

    /// Undo [`JobTracker::retire`] after the tenant's deletion failed.
    pub fn reinstate(&self) {
        self.lock().retired = false;
    }

    pub fn is_retired(&self) -> bool {
        self.lock().retired
    }

    /// Number of pending plus active jobs.
    pub fn incomplete_jobs(&self) -> usize {
        self.lock().incomplete.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.lock().queues.is_empty(Queue::Pending)
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.lock();
        let mut complete: Vec<JobId> = state.complete_compaction_jobs.keys().cloned().collect();
        complete.sort();
        TrackerSnapshot {
            pending: state.ids(Queue::Pending),
            active: state.ids(Queue::Active),
            complete,
            plan_job_leased: state.is_plan_job_leased,
            complete_plan_time: state.complete_plan_time,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, to_write: &[TrackedJob], to_delete: &[TrackedJob]) -> SchedulerResult<()> {
        self.persister
            .write_and_delete_jobs(to_write, to_delete)
            .map_err(|e| {
                self.metrics.inc_persist_failures();
                e.into()
            })
    }

    /// Notify the work signal if pending was refilled. Returns whether it was.
    fn signal_if_refilled(&self, was_empty: bool, state: &TrackerState) -> bool {
        let refilled = was_empty && !state.queues.is_empty(Queue::Pending);
        if refilled {
            self.work_available.notify_waiters();
        }
        refilled
    }

    fn publish(&self, state: &TrackerState) {
        self.metrics.set_queue_sizes(
            state.queues.len(Queue::Pending),
            state.queues.len(Queue::Active),
            state.complete_compaction_jobs.len(),
        );
        self.metrics.set_plan_job_leased(state.is_plan_job_leased);
        self.metrics.set_last_plan_completion(state.complete_plan_time);
    }
}
