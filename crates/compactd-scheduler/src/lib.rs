//! compactd-scheduler — lease-based distribution of compaction work.
//!
//! Hands out "plan" and "compaction" jobs to a pool of workers, one
//! [`JobTracker`] per tenant. The scheduler:
//!
//! - Tracks each tenant's pending, leased and complete jobs
//! - Expires stale leases and schedules planning on a fixed cadence
//! - Writes every change through a `JobPersister` before applying it
//! - Keeps the set of tenants in step with the bucket
//!
//! # Architecture
//!
//! ```text
//! TenantDiscoverer (TenantLister + AllowList)
//!   ├── JobPersistenceManager (initialize / delete tenants)
//!   └── Rotator (tenant → JobTracker, round-robin lease fan-out)
//!       └── JobTracker
//!           ├── JobQueues (pending by order, active by lease time)
//!           ├── JobPersister (persist before commit)
//!           └── TrackerMetrics
//! ```

pub mod allow_list;
pub mod backoff;
pub mod bucket;
pub mod clock;
pub mod config;
pub mod discoverer;
pub mod error;
pub mod job_list;
pub mod job_tracker;
pub mod metrics;
pub mod recovery;
pub mod rotator;

pub use allow_list::AllowList;
pub use backoff::{Backoff, BackoffConfig};
pub use bucket::{DirectoryTenantLister, TenantLister};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CompactdConfig, ResolvedConfig};
pub use discoverer::TenantDiscoverer;
pub use error::{SchedulerError, SchedulerResult};
pub use job_tracker::{JobTracker, MaintenanceParams, PlanOutcome, PlannedJob, TrackerSnapshot};
pub use metrics::{SchedulerMetrics, TrackerMetrics};
pub use recovery::recover_trackers;
pub use rotator::{MaintenanceSummary, Rotator};
