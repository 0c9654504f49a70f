//! Tenant discovery: reconciles the scheduled tenants with the bucket.
//!
//! Each pass lists the bucket, filters it through the [`AllowList`], and
//! then:
//!
//! - initializes storage and registers a tracker for every new tenant
//!   (a tenant whose initialization fails is retried on the next pass);
//! - unregisters and deletes every known tenant that is no longer listed
//!   (if deletion fails the tracker is put back and the tenant stays known).
//!
//! A removed tracker is retired before its storage is deleted. A caller
//! that picked it up from an earlier rotator snapshot finishes its write
//! first and cannot write afterwards, so no job rows outlive the tenant.
//!
//! The first pass retries with capped exponential backoff; later passes log
//! and ignore failures.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use compactd_state::{JobPersistenceManager, TenantId};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::allow_list::AllowList;
use crate::backoff::{Backoff, BackoffConfig};
use crate::bucket::TenantLister;
use crate::clock::{Clock, SystemClock};
use crate::error::{SchedulerError, SchedulerResult};
use crate::job_tracker::JobTracker;
use crate::metrics::SchedulerMetrics;
use crate::rotator::Rotator;

/// Default time between discovery passes.
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Timer-driven tenant reconciler.
pub struct TenantDiscoverer<L> {
    lister: L,
    allow_list: AllowList,
    persistence: Arc<dyn JobPersistenceManager>,
    rotator: Arc<Rotator>,
    clock: Arc<dyn Clock>,
    metrics: Arc<SchedulerMetrics>,
    max_leases: usize,
    backoff: BackoffConfig,
    interval: Duration,
    known_tenants: HashSet<TenantId>,
}

impl<L: TenantLister> TenantDiscoverer<L> {
    pub fn new(
        lister: L,
        persistence: Arc<dyn JobPersistenceManager>,
        rotator: Arc<Rotator>,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            lister,
            allow_list: AllowList::allow_all(),
            persistence,
            rotator,
            clock: Arc::new(SystemClock),
            metrics,
            max_leases: 0,
            backoff: BackoffConfig::default(),
            interval: DEFAULT_DISCOVERY_INTERVAL,
            known_tenants: HashSet::new(),
        }
    }

    pub fn with_allow_list(mut self, allow_list: AllowList) -> Self {
        self.allow_list = allow_list;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Lease cap handed to every tracker this discoverer creates.
    pub fn with_max_leases(mut self, max_leases: usize) -> Self {
        self.max_leases = max_leases;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Seed the known tenants with trackers recovered at startup.
    pub fn recover_from(&mut self, trackers: &HashMap<TenantId, Arc<JobTracker>>) {
        self.known_tenants.extend(trackers.keys().cloned());
    }

    /// Known tenants, sorted.
    pub fn known_tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<_> = self.known_tenants.iter().cloned().collect();
        tenants.sort();
        tenants
    }

    /// Run the first discovery pass, retrying with backoff until it succeeds.
    ///
    /// Fails with [`SchedulerError::Shutdown`] when shutdown is signalled
    /// while waiting, or with the last discovery error once retries run out.
    pub async fn start(&mut self, shutdown: &mut watch::Receiver<bool>) -> SchedulerResult<()> {
        let mut backoff = Backoff::new(self.backoff);
        let mut last_err = None;
        while backoff.ongoing() {
            if *shutdown.borrow() {
                return Err(SchedulerError::Shutdown);
            }
            match self.discover_tenants().await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }

            let delay = backoff.next_delay();
            warn!(
                retries = backoff.retries(),
                delay_ms = delay.as_millis() as u64,
                "initial tenant discovery failed, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return Err(SchedulerError::Shutdown),
            }
        }
        Err(last_err.unwrap_or(SchedulerError::Shutdown))
    }

    /// Reconcile once. Only a failed bucket listing is an error.
    pub async fn discover_tenants(&mut self) -> SchedulerResult<()> {
        let listed = self.lister.list_tenants().await.map_err(|e| {
            warn!(error = %e, "failed to list tenants");
            SchedulerError::Discovery(e)
        })?;

        let mut seen: Vec<TenantId> = listed
            .into_iter()
            .filter(|tenant| self.allow_list.is_allowed(tenant))
            .collect();
        seen.sort();
        seen.dedup();

        for tenant in &seen {
            if self.known_tenants.contains(tenant) {
                continue;
            }
            let persister = match self.persistence.initialize_tenant(tenant) {
                Ok(persister) => persister,
                Err(e) => {
                    warn!(tenant = %tenant, error = %e, "failed to initialize tenant");
                    continue;
                }
            };
            let tracker = JobTracker::new(
                persister,
                tenant.clone(),
                Arc::clone(&self.clock),
                self.max_leases,
                self.metrics.tracker_metrics(tenant),
            )
            .with_work_signal(self.rotator.work_signal());
            self.rotator.add_tenant(tenant.clone(), Arc::new(tracker));
            self.known_tenants.insert(tenant.clone());
            info!(tenant = %tenant, "tenant added");
        }

        let seen: HashSet<&TenantId> = seen.iter().collect();
        let mut gone: Vec<TenantId> = self
            .known_tenants
            .iter()
            .filter(|tenant| !seen.contains(tenant))
            .cloned()
            .collect();
        gone.sort();

        for tenant in gone {
            let tracker = self.rotator.remove_tenant(&tenant);
            match &tracker {
                Some(tracker) => tracker.retire(),
                None => warn!(tenant = %tenant, "known tenant missing from rotator"),
            }
            if let Err(e) = self.persistence.delete_tenant(&tenant) {
                warn!(tenant = %tenant, error = %e, "failed to delete tenant");
                if let Some(tracker) = tracker {
                    tracker.reinstate();
                    self.rotator.add_tenant(tenant.clone(), tracker);
                }
                continue;
            }
            self.known_tenants.remove(&tenant);
            self.metrics.remove_tenant(&tenant);
            info!(tenant = %tenant, "tenant removed");
        }

        Ok(())
    }

    /// Run the initial discovery, then reconcile every interval until shutdown.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> SchedulerResult<()> {
        self.start(&mut shutdown).await?;
        info!(
            interval_secs = self.interval.as_secs(),
            tenants = self.known_tenants.len(),
            "tenant discoverer started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    // Failures were logged by discover_tenants.
                    let _ = self.discover_tenants().await;
                }
                _ = shutdown.changed() => {
                    info!("tenant discoverer shutting down");
                    return Ok(());
                }
            }
        }
    }
}
