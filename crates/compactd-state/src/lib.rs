//! compactd-state — durable job lists for the compaction scheduler.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage of each tenant's tracked jobs.
//!
//! # Architecture
//!
//! ```text
//! JobPersistenceManager (JobStore)
//!   ├── initialize_tenant() → JobPersister (TenantJobs, `{tenant}/` key space)
//!   ├── delete_tenant()     → drops the tenant record and all of its jobs
//!   └── recover_tenants()   → every tenant with its persisted jobs
//! ```
//!
//! Jobs are JSON-serialized into redb's `&[u8]` value columns. Each
//! `write_and_delete_jobs` call is one write transaction, so it either lands
//! completely or not at all.

pub mod error;
pub mod persister;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use persister::{JobPersistenceManager, JobPersister, NopJobPersister, RecoveredTenant};
pub use store::{JobStore, TenantJobs};
pub use types::*;
