//! Per-tenant scheduler metrics.
//!
//! Each [`JobTracker`](crate::JobTracker) owns an `Arc<TrackerMetrics>`
//! and publishes gauges after every committed mutation. Counters and
//! gauges are plain atomics, so publishing never contends with readers.
//! [`SchedulerMetrics`] keeps the tenant → metrics registry and renders the
//! Prometheus text exposition format.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Metrics of a single tenant's tracker.
#[derive(Debug, Default)]
pub struct TrackerMetrics {
    pending_jobs: AtomicU64,
    active_jobs: AtomicU64,
    complete_jobs: AtomicU64,
    plan_job_leased: AtomicU64,
    /// Unix seconds of the last plan completion, 0 when never planned.
    last_plan_completion: AtomicU64,
    plans_created: AtomicU64,
    leases_granted: AtomicU64,
    leases_expired: AtomicU64,
    jobs_completed: AtomicU64,
    persist_failures: AtomicU64,
}

/// Point-in-time copy of a tenant's metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerMetricsSnapshot {
    pub tenant: String,
    pub pending_jobs: u64,
    pub active_jobs: u64,
    pub complete_jobs: u64,
    pub plan_job_leased: bool,
    pub last_plan_completion_secs: u64,
    pub plans_created: u64,
    pub leases_granted: u64,
    pub leases_expired: u64,
    pub jobs_completed: u64,
    pub persist_failures: u64,
}

impl TrackerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the tracker's current queue sizes.
    pub fn set_queue_sizes(&self, pending: usize, active: usize, complete: usize) {
        self.pending_jobs.store(pending as u64, Ordering::Relaxed);
        self.active_jobs.store(active as u64, Ordering::Relaxed);
        self.complete_jobs.store(complete as u64, Ordering::Relaxed);
    }

    pub fn set_plan_job_leased(&self, leased: bool) {
        self.plan_job_leased.store(leased as u64, Ordering::Relaxed);
    }

    pub fn set_last_plan_completion(&self, at: Option<SystemTime>) {
        let secs = at
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.last_plan_completion.store(secs, Ordering::Relaxed);
    }

    pub fn inc_plans_created(&self) {
        self.plans_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_leases_granted(&self) {
        self.leases_granted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_leases_expired(&self, n: usize) {
        self.leases_expired.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn inc_jobs_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_persist_failures(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, tenant: &str) -> TrackerMetricsSnapshot {
        TrackerMetricsSnapshot {
            tenant: tenant.to_string(),
            pending_jobs: self.pending_jobs.load(Ordering::Relaxed),
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            complete_jobs: self.complete_jobs.load(Ordering::Relaxed),
            plan_job_leased: self.plan_job_leased.load(Ordering::Relaxed) != 0,
            last_plan_completion_secs: self.last_plan_completion.load(Ordering::Relaxed),
            plans_created: self.plans_created.load(Ordering::Relaxed),
            leases_granted: self.leases_granted.load(Ordering::Relaxed),
            leases_expired: self.leases_expired.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }
}

/// Registry of per-tenant tracker metrics.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    trackers: RwLock<HashMap<String, Arc<TrackerMetrics>>>,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the metrics handle of a tenant.
    pub fn tracker_metrics(&self, tenant: &str) -> Arc<TrackerMetrics> {
        if let Some(m) = self
            .trackers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tenant)
        {
            return Arc::clone(m);
        }
        let mut trackers = self.trackers.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            trackers
                .entry(tenant.to_string())
                .or_insert_with(|| Arc::new(TrackerMetrics::new())),
        )
    }

    /// Drop a tenant's series.
    pub fn remove_tenant(&self, tenant: &str) {
        self.trackers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tenant);
    }

    /// Snapshot every tenant, sorted by tenant id.
    pub fn snapshot(&self) -> Vec<TrackerMetricsSnapshot> {
        let trackers = self.trackers.read().unwrap_or_else(PoisonError::into_inner);
        let mut snapshots: Vec<_> = trackers
            .iter()
            .map(|(tenant, m)| m.snapshot(tenant))
            .collect();
        snapshots.sort_by(|a, b| a.tenant.cmp(&b.tenant));
        snapshots
    }

    pub fn render_prometheus(&self) -> String {
        render_prometheus(&self.snapshot())
    }
}

/// Render tracker snapshots into Prometheus text format.
///
/// Produces GAUGE and COUNTER metrics with `tenant` labels.
pub fn render_prometheus(snapshots: &[TrackerMetricsSnapshot]) -> String {
    let mut out = String::new();

    write_family(
        &mut out,
        "compactd_scheduler_pending_jobs",
        "Jobs waiting to be leased.",
        "gauge",
        snapshots,
        |s| s.pending_jobs.to_string(),
    );
    write_family(
        &mut out,
        "compactd_scheduler_active_jobs",
        "Jobs currently leased to a worker.",
        "gauge",
        snapshots,
        |s| s.active_jobs.to_string(),
    );
    write_family(
        &mut out,
        "compactd_scheduler_complete_jobs",
        "Completed compaction jobs retained by the tracker.",
        "gauge",
        snapshots,
        |s| s.complete_jobs.to_string(),
    );
    write_family(
        &mut out,
        "compactd_scheduler_plan_job_leased",
        "Whether the plan job is currently leased (0 or 1).",
        "gauge",
        snapshots,
        |s| u8::from(s.plan_job_leased).to_string(),
    );
    write_family(
        &mut out,
        "compactd_scheduler_last_plan_completion_timestamp_seconds",
        "Unix time of the last completed plan job, 0 if never planned.",
        "gauge",
        snapshots,
        |s| s.last_plan_completion_secs.to_string(),
    );
    write_family(
        &mut out,
        "compactd_scheduler_plans_created_total",
        "Plan jobs created by maintenance.",
        "counter",
        snapshots,
        |s| s.plans_created.to_string(),
    );
    write_family(
        &mut out,
        "compactd_scheduler_leases_granted_total",
        "Leases granted to workers.",
        "counter",
        snapshots,
        |s| s.leases_granted.to_string(),
    );
    write_family(
        &mut out,
        "compactd_scheduler_leases_expired_total",
        "Leases reverted to pending after expiring.",
        "counter",
        snapshots,
        |s| s.leases_expired.to_string(),
    );
    write_family(
        &mut out,
        "compactd_scheduler_jobs_completed_total",
        "Jobs completed by workers.",
        "counter",
        snapshots,
        |s| s.jobs_completed.to_string(),
    );
    write_family(
        &mut out,
        "compactd_scheduler_persist_failures_total",
        "Job persistence calls that failed.",
        "counter",
        snapshots,
        |s| s.persist_failures.to_string(),
    );

    out
}

fn write_family(
    out: &mut String,
    name: &str,
    help: &str,
    kind: &str,
    snapshots: &[TrackerMetricsSnapshot],
    value: impl Fn(&TrackerMetricsSnapshot) -> String,
) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} {kind}\n"));
    for s in snapshots {
        out.push_str(&format!(
            "{name}{{tenant=\"{}\"}} {}\n",
            escape_label_value(&s.tenant),
            value(s)
        ));
    }
}

/// Escape `\`, `"` and newlines in a label value.
fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn tracker_metrics_is_shared_per_tenant() {
        let metrics = SchedulerMetrics::new();
        let a = metrics.tracker_metrics("t1");
        let b = metrics.tracker_metrics("t1");
        a.inc_leases_granted();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(metrics.snapshot()[0].leases_granted, 1);
    }

    #[test]
    fn remove_tenant_drops_series() {
        let metrics = SchedulerMetrics::new();
        metrics.tracker_metrics("t1");
        metrics.tracker_metrics("t2");
        metrics.remove_tenant("t1");

        let tenants: Vec<_> = metrics.snapshot().into_iter().map(|s| s.tenant).collect();
        assert_eq!(tenants, ["t2"]);
    }

    #[test]
    fn last_plan_completion_in_seconds() {
        let m = TrackerMetrics::new();
        m.set_last_plan_completion(Some(UNIX_EPOCH + Duration::from_secs(1_767_324_600)));
        assert_eq!(m.snapshot("t").last_plan_completion_secs, 1_767_324_600);

        m.set_last_plan_completion(None);
        assert_eq!(m.snapshot("t").last_plan_completion_secs, 0);
    }

    #[test]
    fn label_values_are_escaped() {
        let metrics = SchedulerMetrics::new();
        metrics.tracker_metrics("we\"ird\\ten\nant").set_queue_sizes(1, 0, 0);

        let output = metrics.render_prometheus();

        assert!(output.contains(r#"compactd_scheduler_pending_jobs{tenant="we\"ird\\ten\nant"} 1"#));
        assert!(output.lines().all(|line| !line.starts_with("ant")));
    }

    #[test]
    fn render_empty() {
        let output = render_prometheus(&[]);
        assert!(output.contains("# HELP compactd_scheduler_pending_jobs"));
        assert!(output.contains("# TYPE compactd_scheduler_leases_granted_total counter"));
    }

    #[test]
    fn render_single_tenant() {
        let metrics = SchedulerMetrics::new();
        let m = metrics.tracker_metrics("tenant-a");
        m.set_queue_sizes(3, 2, 5);
        m.set_plan_job_leased(true);
        m.inc_plans_created();
        m.add_leases_expired(4);

        let output = metrics.render_prometheus();
        assert!(output.contains("compactd_scheduler_pending_jobs{tenant=\"tenant-a\"} 3"));
        assert!(output.contains("compactd_scheduler_active_jobs{tenant=\"tenant-a\"} 2"));
        assert!(output.contains("compactd_scheduler_complete_jobs{tenant=\"tenant-a\"} 5"));
        assert!(output.contains("compactd_scheduler_plan_job_leased{tenant=\"tenant-a\"} 1"));
        assert!(output.contains("compactd_scheduler_plans_created_total{tenant=\"tenant-a\"} 1"));
        assert!(output.contains("compactd_scheduler_leases_expired_total{tenant=\"tenant-a\"} 4"));
    }

    #[test]
    fn render_format_is_prometheus_compatible() {
        let metrics = SchedulerMetrics::new();
        metrics.tracker_metrics("a");
        metrics.tracker_metrics("b");
        let output = metrics.render_prometheus();

        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            assert!(
                line.contains('{') && line.contains('}'),
                "line should have labels: {line}"
            );
        }
    }
}
